//! Store identity: the closed set of backends and their short codes.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use stremthru_core::StoreError;

/// The closed set of supported backends. Fixed at build time; lookups in
/// both directions are total on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreName {
    Alldebrid,
    Debridlink,
    Easydebrid,
    Offcloud,
    Pikpak,
    Premiumize,
    Realdebrid,
    Torbox,
    Stremthru,
    Qbittorrent,
}

/// Stable two-letter code for each store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreCode {
    Ad,
    Dl,
    Ed,
    Oc,
    Pp,
    Pm,
    Rd,
    Tb,
    St,
    Qb,
}

impl StoreName {
    pub const ALL: [Self; 10] = [
        Self::Alldebrid,
        Self::Debridlink,
        Self::Easydebrid,
        Self::Offcloud,
        Self::Pikpak,
        Self::Premiumize,
        Self::Realdebrid,
        Self::Torbox,
        Self::Stremthru,
        Self::Qbittorrent,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alldebrid => "alldebrid",
            Self::Debridlink => "debridlink",
            Self::Easydebrid => "easydebrid",
            Self::Offcloud => "offcloud",
            Self::Pikpak => "pikpak",
            Self::Premiumize => "premiumize",
            Self::Realdebrid => "realdebrid",
            Self::Torbox => "torbox",
            Self::Stremthru => "stremthru",
            Self::Qbittorrent => "qbittorrent",
        }
    }

    #[must_use]
    pub const fn code(self) -> StoreCode {
        match self {
            Self::Alldebrid => StoreCode::Ad,
            Self::Debridlink => StoreCode::Dl,
            Self::Easydebrid => StoreCode::Ed,
            Self::Offcloud => StoreCode::Oc,
            Self::Pikpak => StoreCode::Pp,
            Self::Premiumize => StoreCode::Pm,
            Self::Realdebrid => StoreCode::Rd,
            Self::Torbox => StoreCode::Tb,
            Self::Stremthru => StoreCode::St,
            Self::Qbittorrent => StoreCode::Qb,
        }
    }
}

impl StoreCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ad => "ad",
            Self::Dl => "dl",
            Self::Ed => "ed",
            Self::Oc => "oc",
            Self::Pp => "pp",
            Self::Pm => "pm",
            Self::Rd => "rd",
            Self::Tb => "tb",
            Self::St => "st",
            Self::Qb => "qb",
        }
    }

    #[must_use]
    pub const fn name(self) -> StoreName {
        match self {
            Self::Ad => StoreName::Alldebrid,
            Self::Dl => StoreName::Debridlink,
            Self::Ed => StoreName::Easydebrid,
            Self::Oc => StoreName::Offcloud,
            Self::Pp => StoreName::Pikpak,
            Self::Pm => StoreName::Premiumize,
            Self::Rd => StoreName::Realdebrid,
            Self::Tb => StoreName::Torbox,
            Self::St => StoreName::Stremthru,
            Self::Qb => StoreName::Qbittorrent,
        }
    }
}

impl Display for StoreName {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl Display for StoreCode {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for StoreName {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| StoreError::bad_request(format!("invalid store name: {value}")))
    }
}

impl FromStr for StoreCode {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        StoreName::ALL
            .into_iter()
            .map(StoreName::code)
            .find(|code| code.as_str() == value)
            .ok_or_else(|| StoreError::bad_request(format!("invalid store code: {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_code_lookups_are_total() {
        for name in StoreName::ALL {
            assert_eq!(name.code().name(), name);
            assert_eq!(name.as_str().parse::<StoreName>().unwrap(), name);
            assert_eq!(name.code().as_str().parse::<StoreCode>().unwrap(), name.code());
        }
    }

    #[test]
    fn expected_code_pairs() {
        assert_eq!(StoreName::Alldebrid.code().as_str(), "ad");
        assert_eq!(StoreName::Debridlink.code().as_str(), "dl");
        assert_eq!(StoreName::Easydebrid.code().as_str(), "ed");
        assert_eq!(StoreName::Offcloud.code().as_str(), "oc");
        assert_eq!(StoreName::Pikpak.code().as_str(), "pp");
        assert_eq!(StoreName::Premiumize.code().as_str(), "pm");
        assert_eq!(StoreName::Realdebrid.code().as_str(), "rd");
        assert_eq!(StoreName::Torbox.code().as_str(), "tb");
        assert_eq!(StoreName::Stremthru.code().as_str(), "st");
        assert_eq!(StoreName::Qbittorrent.code().as_str(), "qb");
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!("debrider".parse::<StoreName>().is_err());
        assert!("xx".parse::<StoreCode>().is_err());
    }
}
