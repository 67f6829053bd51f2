//! Conversions from provider-native units into the canonical unit set.

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - 273.15
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

pub fn kmh_to_ms(kmh: f64) -> f64 {
    kmh / 3.6
}

pub fn mph_to_ms(mph: f64) -> f64 {
    mph * 0.447_04
}

pub fn pascal_to_hpa(pascal: f64) -> f64 {
    pascal / 100.0
}

pub fn inhg_to_hpa(inhg: f64) -> f64 {
    inhg * 33.863_9
}

pub fn inches_to_mm(inches: f64) -> f64 {
    inches * 25.4
}

/// Folds any bearing into `[0, 360)`.
pub fn normalize_bearing(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

/// Smallest angle between two bearings, in `[0, 180]`.
pub fn angular_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn converts_temperatures() {
        assert!(close(kelvin_to_celsius(273.15), 0.0));
        assert!(close(kelvin_to_celsius(298.15), 25.0));
        assert!(close(fahrenheit_to_celsius(212.0), 100.0));
    }

    #[test]
    fn converts_speed_and_pressure() {
        assert!(close(kmh_to_ms(36.0), 10.0));
        assert!(close(mph_to_ms(10.0), 4.4704));
        assert!(close(pascal_to_hpa(101_325.0), 1013.25));
        assert!((inhg_to_hpa(29.92) - 1013.2).abs() < 0.1);
        assert!(close(inches_to_mm(1.0), 25.4));
    }

    #[test]
    fn bearings_wrap_around() {
        assert!(close(normalize_bearing(-10.0), 350.0));
        assert!(close(normalize_bearing(720.0), 0.0));
        assert!(close(angular_difference(350.0, 10.0), 20.0));
        assert!(close(angular_difference(10.0, 350.0), 20.0));
        assert!(close(angular_difference(90.0, 270.0), 180.0));
    }
}
