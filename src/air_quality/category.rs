//! US EPA style AQI bands.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: i32) -> Self {
        match aqi {
            i32::MIN..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthyForSensitiveGroups,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitiveGroups => "Unhealthy for sensitive groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Good => "🟢",
            Self::Moderate => "🟡",
            Self::UnhealthyForSensitiveGroups => "🟠",
            Self::Unhealthy => "🔴",
            Self::VeryUnhealthy => "🟣",
            Self::Hazardous => "🟤",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Good => "Air quality is good. Enjoy your time outdoors!",
            Self::Moderate => {
                "Air quality is moderate. Unusually sensitive people should limit prolonged outdoor exertion."
            }
            Self::UnhealthyForSensitiveGroups => {
                "Unhealthy for sensitive groups. People with heart or lung disease, children and older adults should reduce time outdoors."
            }
            Self::Unhealthy => {
                "Air quality is unhealthy. Avoid prolonged outdoor exertion and keep windows closed."
            }
            Self::VeryUnhealthy => {
                "Very unhealthy. Stay indoors, run an air purifier and wear a respirator outside."
            }
            Self::Hazardous => {
                "Hazardous! Minimize time outdoors, protect your airways, keep windows shut and run air purifiers."
            }
        }
    }
}
