use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Which client produced a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchMethod {
    #[default]
    #[serde(rename = "unspecified")]
    Unspecified,
    /// Plain HTTP client.
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "chromium-headless")]
    ChromiumHeadless,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Unspecified => "unspecified",
            FetchMethod::Direct => "direct",
            FetchMethod::ChromiumHeadless => "chromium-headless",
        }
    }

    pub fn is_unspecified(&self) -> bool {
        *self == FetchMethod::Unspecified
    }
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(FetchMethod::Unspecified),
            "direct" => Ok(FetchMethod::Direct),
            "chromium-headless" => Ok(FetchMethod::ChromiumHeadless),
            other => Err(Error::InvalidInput(format!("no such fetch method: {other:?}"))),
        }
    }
}
