//! Linear and areal map units.

use serde::{Deserialize, Serialize};

/// Metres per degree at the equator, the approximation used for degree units.
const METERS_PER_DEGREE: f64 = 111_319.490_793_273_58;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    #[default]
    Meters,
    Kilometers,
    Feet,
    NauticalMiles,
    Yards,
    Miles,
    Degrees,
    Centimeters,
    Millimeters,
}

impl DistanceUnit {
    pub fn meters(self) -> f64 {
        match self {
            DistanceUnit::Meters => 1.0,
            DistanceUnit::Kilometers => 1_000.0,
            DistanceUnit::Feet => 0.3048,
            DistanceUnit::NauticalMiles => 1_852.0,
            DistanceUnit::Yards => 0.9144,
            DistanceUnit::Miles => 1_609.344,
            DistanceUnit::Degrees => METERS_PER_DEGREE,
            DistanceUnit::Centimeters => 0.01,
            DistanceUnit::Millimeters => 0.001,
        }
    }

    /// The areal unit whose side is this linear unit.
    pub fn area_unit(self) -> AreaUnit {
        match self {
            DistanceUnit::Meters => AreaUnit::SquareMeters,
            DistanceUnit::Kilometers => AreaUnit::SquareKilometers,
            DistanceUnit::Feet => AreaUnit::SquareFeet,
            DistanceUnit::NauticalMiles => AreaUnit::SquareNauticalMiles,
            DistanceUnit::Yards => AreaUnit::SquareYards,
            DistanceUnit::Miles => AreaUnit::SquareMiles,
            DistanceUnit::Degrees => AreaUnit::SquareDegrees,
            DistanceUnit::Centimeters => AreaUnit::SquareCentimeters,
            DistanceUnit::Millimeters => AreaUnit::SquareMillimeters,
        }
    }

    /// Default search radius used to frame a sample in a view, in this unit.
    pub fn fit_to_sample(self) -> f64 {
        match self {
            DistanceUnit::Meters => 120.0,
            DistanceUnit::Kilometers => 0.120,
            DistanceUnit::Feet => 393.0,
            DistanceUnit::NauticalMiles => 0.065,
            DistanceUnit::Yards => 132.0,
            DistanceUnit::Miles => 0.075,
            DistanceUnit::Degrees => 0.0011,
            DistanceUnit::Centimeters => 12_000.0,
            DistanceUnit::Millimeters => 120_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaUnit {
    #[default]
    SquareMeters,
    SquareKilometers,
    SquareFeet,
    SquareYards,
    SquareMiles,
    Hectares,
    Acres,
    SquareNauticalMiles,
    SquareDegrees,
    SquareCentimeters,
    SquareMillimeters,
}

impl AreaUnit {
    pub const ALL: [AreaUnit; 11] = [
        AreaUnit::SquareMeters,
        AreaUnit::SquareKilometers,
        AreaUnit::SquareFeet,
        AreaUnit::SquareYards,
        AreaUnit::SquareMiles,
        AreaUnit::Hectares,
        AreaUnit::Acres,
        AreaUnit::SquareNauticalMiles,
        AreaUnit::SquareDegrees,
        AreaUnit::SquareCentimeters,
        AreaUnit::SquareMillimeters,
    ];

    pub fn square_meters(self) -> f64 {
        match self {
            AreaUnit::SquareMeters => 1.0,
            AreaUnit::SquareKilometers => 1.0e6,
            AreaUnit::SquareFeet => 0.3048 * 0.3048,
            AreaUnit::SquareYards => 0.9144 * 0.9144,
            AreaUnit::SquareMiles => 1_609.344 * 1_609.344,
            AreaUnit::Hectares => 1.0e4,
            AreaUnit::Acres => 4_046.856_422_4,
            AreaUnit::SquareNauticalMiles => 1_852.0 * 1_852.0,
            AreaUnit::SquareDegrees => METERS_PER_DEGREE * METERS_PER_DEGREE,
            AreaUnit::SquareCentimeters => 1.0e-4,
            AreaUnit::SquareMillimeters => 1.0e-6,
        }
    }

    /// Multiply a value in `self` by this factor to express it in `to`.
    pub fn factor_to(self, to: AreaUnit) -> f64 {
        if self == to {
            1.0
        } else {
            self.square_meters() / to.square_meters()
        }
    }

    pub fn abbreviation(self) -> &'static str {
        match self {
            AreaUnit::SquareMeters => "m²",
            AreaUnit::SquareKilometers => "km²",
            AreaUnit::SquareFeet => "ft²",
            AreaUnit::SquareYards => "yd²",
            AreaUnit::SquareMiles => "mi²",
            AreaUnit::Hectares => "ha",
            AreaUnit::Acres => "ac",
            AreaUnit::SquareNauticalMiles => "NM²",
            AreaUnit::SquareDegrees => "deg²",
            AreaUnit::SquareCentimeters => "cm²",
            AreaUnit::SquareMillimeters => "mm²",
        }
    }

    /// Parse either the serde name (`square_kilometers`) or the abbreviation.
    pub fn parse(text: &str) -> Option<AreaUnit> {
        let t = text.trim();
        AreaUnit::ALL.into_iter().find(|u| {
            u.abbreviation().eq_ignore_ascii_case(t)
                || serde_json::to_value(u).ok().and_then(|v| v.as_str().map(|s| s == t)).unwrap_or(false)
        })
    }
}

impl std::fmt::Display for AreaUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.abbreviation())
    }
}
