use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Farm {
    pub id: Option<i64>,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Farm {
    /// Key under which the farm's weather history is cached.
    ///
    /// Farms closer than ~1km share a series.
    pub fn location_key(&self) -> String {
        format!("{:.2},{:.2}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: Option<i64>,
    pub farm_id: i64,
    pub name: String,
    /// Square metres
    pub area: f64,
    pub daily_fixed_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_key_rounds_to_two_decimals() {
        let farm = Farm {
            id: Some(1),
            name: "North".into(),
            latitude: 35.68951,
            longitude: 139.69171,
        };
        assert_eq!(farm.location_key(), "35.69,139.69");
    }
}
