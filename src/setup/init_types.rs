use serde::Deserialize;

/// One line of the package file.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageRow {
    pub id: u32,
    pub address: String,
    pub city: String,
    pub zip: String,
    pub deadline: String,
    pub weight: u32,
    #[serde(default)]
    pub notes: String,
}

/// One line of the address-correction file.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionRow {
    pub id: u32,
    pub effective: String,
    pub address: String,
    pub city: String,
    pub zip: String,
}
