//! TWSE MIS API response models.
//!
//! The MIS endpoint returns every numeric field as a string, using "-" when
//! no value is available yet (e.g. before the first trade of the day).

use serde::Deserialize;

/// Response wrapper for `getStockInfo.jsp`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MisResponse {
    #[serde(default)]
    pub msg_array: Vec<MisEntry>,
    pub rtcode: Option<String>,
    pub rtmessage: Option<String>,
}

/// One instrument in the MIS response
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MisEntry {
    /// Instrument code
    #[serde(rename = "c")]
    pub code: Option<String>,
    /// Short name
    #[serde(rename = "n")]
    pub name: Option<String>,
    /// Last trade price
    #[serde(rename = "z")]
    pub last: Option<String>,
    /// Previous close
    #[serde(rename = "y")]
    pub previous_close: Option<String>,
    /// Upper price limit
    #[serde(rename = "u")]
    pub upper_limit: Option<String>,
    /// Lower price limit
    #[serde(rename = "w")]
    pub lower_limit: Option<String>,
    /// Best five bids, "_" separated
    #[serde(rename = "b")]
    pub bids: Option<String>,
    /// Trade time, epoch milliseconds
    #[serde(rename = "tlong")]
    pub time_millis: Option<String>,
}
