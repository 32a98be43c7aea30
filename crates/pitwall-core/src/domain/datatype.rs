//! Datatypes: the independently extracted categories of on-screen data.

use serde::{Deserialize, Serialize};

/// A category of broadcast graphics data, each with its own expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// `{"lap_number": <positive int>}`
    LapNumber,
    /// `{"timing_table": [{position, driver, gap, interval}, ...]}`
    TimingTable,
    /// `{"tire_info": [{driver, compound, age}, ...]}`
    TireInfo,
    /// Any other configured name; only required to be a JSON object.
    Custom(String),
}

impl Datatype {
    pub const LAP_NUMBER: &'static str = "current_lap";
    pub const TIMING_TABLE: &'static str = "timing_table";
    pub const TIRE_INFO: &'static str = "tire_info";

    pub fn from_name(name: &str) -> Self {
        match name {
            Self::LAP_NUMBER => Datatype::LapNumber,
            Self::TIMING_TABLE => Datatype::TimingTable,
            Self::TIRE_INFO => Datatype::TireInfo,
            other => Datatype::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Datatype::LapNumber => Self::LAP_NUMBER,
            Datatype::TimingTable => Self::TIMING_TABLE,
            Datatype::TireInfo => Self::TIRE_INFO,
            Datatype::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A configured datatype and the prompt sent for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatatypeSpec {
    pub name: String,
    pub prompt: String,
}

impl DatatypeSpec {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }

    pub fn datatype(&self) -> Datatype {
        Datatype::from_name(&self.name)
    }
}
