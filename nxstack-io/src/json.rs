//! JSON form of regions of interest and fit functions.
//!
//! Every object carries a `type` discriminator looked up in an explicit
//! kind-to-name table. Region kinds missing from the table have no JSON form.

use crate::{Error, Result};
use nxstack_core::function::default_name;
use nxstack_core::{Function, FunctionKind, Parameter, Roi, RoiKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::mem::discriminant;

const TYPE_KEY: &str = "type";

const ROI_TYPES: &[(RoiKind, &str)] = &[
    (RoiKind::Point, "PointROI"),
    (RoiKind::Line, "LinearROI"),
    (RoiKind::Rectangle, "RectangularROI"),
    (RoiKind::Sector, "SectorROI"),
    (RoiKind::Circle, "CircularROI"),
    (RoiKind::Ellipse, "EllipticalROI"),
    (RoiKind::Polygon, "PolygonalROI"),
];

// Polynomial matches on the variant only; its degree comes from the parameter count.
const FUNCTION_TYPES: &[(FunctionKind, &str)] = &[
    (FunctionKind::Gaussian, "Gaussian"),
    (FunctionKind::Lorentzian, "Lorentzian"),
    (FunctionKind::PseudoVoigt, "PseudoVoigt"),
    (FunctionKind::StraightLine, "StraightLine"),
    (FunctionKind::Quadratic, "Quadratic"),
    (FunctionKind::Cubic, "Cubic"),
    (FunctionKind::Polynomial(0), "Polynomial"),
    (FunctionKind::Offset, "Offset"),
    (FunctionKind::Step, "Step"),
];

#[derive(Serialize, Deserialize)]
struct FunctionRecord {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    parameters: Vec<ParameterRecord>,
}

#[derive(Serialize, Deserialize)]
struct ParameterRecord {
    name: String,
    #[serde(with = "float")]
    value: f64,
    #[serde(with = "float")]
    lower: f64,
    #[serde(with = "float")]
    upper: f64,
    fixed: bool,
}

impl From<&Parameter> for ParameterRecord {
    fn from(p: &Parameter) -> Self {
        Self {
            name: p.name.clone(),
            value: p.value,
            lower: p.lower,
            upper: p.upper,
            fixed: p.fixed,
        }
    }
}

impl From<ParameterRecord> for Parameter {
    fn from(r: ParameterRecord) -> Self {
        Parameter::new(r.name, r.value)
            .with_bounds(r.lower, r.upper)
            .with_fixed(r.fixed)
    }
}

/// Floats as JSON numbers, with NaN and the infinities spelled out as
/// `"NaN"`, `"Infinity"` and `"-Infinity"`.
mod float {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Name(String),
    }

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub(super) fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() && value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else if value.is_infinite() {
            serializer.serialize_str("-Infinity")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Name(name) => match name.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("'{other}' is not a number"))),
            },
        }
    }
}

fn roi_type_name(kind: RoiKind) -> Option<&'static str> {
    ROI_TYPES.iter().find(|(k, _)| *k == kind).map(|(_, n)| *n)
}

fn unsupported(kind: RoiKind) -> Error {
    Error::UnsupportedVariant(format!("{kind:?} region has no JSON form"))
}

/// Whether `roi` can be written as JSON.
#[must_use]
pub fn is_roi_supported(roi: &Roi) -> bool {
    roi_type_name(roi.kind()).is_some()
}

/// Encodes a region.
///
/// # Errors
/// Returns `UnsupportedVariant` for kinds without a JSON form and
/// `InvalidParameters` for a region that fails [`Roi::validate`], such as
/// one with a non-finite coordinate.
pub fn marshal_roi(roi: &Roi) -> Result<String> {
    let name = roi_type_name(roi.kind()).ok_or_else(|| unsupported(roi.kind()))?;
    roi.validate()?;
    let body = match roi {
        Roi::Point(r) => serde_json::to_value(r)?,
        Roi::Line(r) => serde_json::to_value(r)?,
        Roi::Rectangle(r) => serde_json::to_value(r)?,
        Roi::Sector(r) => serde_json::to_value(r)?,
        Roi::Circle(r) => serde_json::to_value(r)?,
        Roi::Ellipse(r) => serde_json::to_value(r)?,
        Roi::Polygon(r) => serde_json::to_value(r)?,
        Roi::Ring(_) | Roi::Parabola(_) => return Err(unsupported(roi.kind())),
    };
    let Value::Object(fields) = body else {
        return Err(Error::InvalidFormat(format!("{name} did not encode as an object")));
    };
    let mut tagged = Map::with_capacity(fields.len() + 1);
    tagged.insert(TYPE_KEY.to_string(), Value::String(name.to_string()));
    tagged.extend(fields);
    Ok(serde_json::to_string(&Value::Object(tagged))?)
}

/// Decodes a region.
///
/// # Errors
/// Returns an error for malformed JSON, a missing or unknown `type`,
/// fields that do not match the type, or a region that fails
/// [`Roi::validate`].
pub fn unmarshal_roi(json: &str) -> Result<Roi> {
    let mut value: Value = serde_json::from_str(json)?;
    let name = take_type(&mut value)?;
    let kind = ROI_TYPES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(k, _)| *k)
        .ok_or_else(|| Error::UnsupportedVariant(format!("unknown region type '{name}'")))?;
    let roi = match kind {
        RoiKind::Point => Roi::Point(serde_json::from_value(value)?),
        RoiKind::Line => Roi::Line(serde_json::from_value(value)?),
        RoiKind::Rectangle => Roi::Rectangle(serde_json::from_value(value)?),
        RoiKind::Sector => Roi::Sector(serde_json::from_value(value)?),
        RoiKind::Circle => Roi::Circle(serde_json::from_value(value)?),
        RoiKind::Ellipse => Roi::Ellipse(serde_json::from_value(value)?),
        RoiKind::Polygon => Roi::Polygon(serde_json::from_value(value)?),
        RoiKind::Ring | RoiKind::Parabola => return Err(unsupported(kind)),
    };
    roi.validate()?;
    Ok(roi)
}

/// Encodes a function.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn marshal_function(function: &Function) -> Result<String> {
    let kind = function.kind();
    let name = FUNCTION_TYPES
        .iter()
        .find(|(k, _)| discriminant(k) == discriminant(&kind))
        .map(|(_, n)| *n)
        .ok_or_else(|| Error::UnsupportedVariant(default_name(kind)))?;
    let record = FunctionRecord {
        kind: name.to_string(),
        name: function.name().to_string(),
        parameters: function.parameters().iter().map(ParameterRecord::from).collect(),
    };
    Ok(serde_json::to_string(&record)?)
}

/// Decodes a function.
///
/// # Errors
/// Returns an error for malformed JSON, an unknown `type`, or a parameter
/// list that does not fit the type.
pub fn unmarshal_function(json: &str) -> Result<Function> {
    let record: FunctionRecord = serde_json::from_str(json)?;
    let kind = FUNCTION_TYPES
        .iter()
        .find(|(_, n)| *n == record.kind)
        .map(|(k, _)| *k)
        .ok_or_else(|| Error::UnsupportedVariant(format!("unknown function type '{}'", record.kind)))?;
    let kind = match kind {
        FunctionKind::Polynomial(_) => {
            let degree = record.parameters.len().checked_sub(1).ok_or_else(|| {
                Error::InvalidFormat("polynomial without coefficients".to_string())
            })?;
            FunctionKind::Polynomial(degree)
        }
        other => other,
    };
    let parameters = record.parameters.into_iter().map(Parameter::from).collect();
    Ok(Function::with_parameters(kind, parameters)?.with_name(record.name))
}

/// Removes one enclosing `[` `]` pair, as added by the attribute reader
/// around one-element string arrays.
#[must_use]
pub fn strip_brackets(value: &str) -> &str {
    value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value)
}

fn take_type(value: &mut Value) -> Result<String> {
    let fields = value
        .as_object_mut()
        .ok_or_else(|| Error::InvalidFormat("expected a JSON object".to_string()))?;
    match fields.remove(TYPE_KEY) {
        Some(Value::String(name)) => Ok(name),
        _ => Err(Error::InvalidFormat(format!("missing '{TYPE_KEY}' field"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nxstack_core::roi::{ParabolicRoi, RingRoi};

    fn supported_rois() -> Vec<Roi> {
        vec![
            Roi::point(1.5, -2.0),
            Roi::Line(nxstack_core::roi::LineRoi {
                start: [0.0, 0.0],
                end: [10.0, 5.5],
            }),
            Roi::rectangle([1.0, 2.0], [30.0, 40.0], 0.25).unwrap(),
            Roi::sector([100.0, 100.0], [10.0, 50.0], [0.0, 1.2]).unwrap(),
            Roi::circle([5.0, 5.0], 3.0).unwrap(),
            Roi::Ellipse(nxstack_core::roi::EllipticalRoi {
                centre: [1.0, 1.0],
                semi_axes: [4.0, 2.0],
                angle: 0.5,
            }),
            Roi::polygon(vec![[0.0, 0.0], [4.0, 0.0], [2.0, 3.0]]).unwrap(),
        ]
    }

    #[test]
    fn test_roi_round_trip() {
        for roi in supported_rois() {
            assert!(is_roi_supported(&roi));
            let json = marshal_roi(&roi).unwrap();
            assert_eq!(unmarshal_roi(&json).unwrap(), roi, "{json}");
        }
    }

    #[test]
    fn test_roi_carries_type() {
        let json = marshal_roi(&Roi::circle([0.0, 0.0], 1.0).unwrap()).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "CircularROI");
        assert_eq!(value["radius"], 1.0);
    }

    #[test]
    fn test_unsupported_rois() {
        let ring = Roi::Ring(RingRoi {
            centre: [0.0, 0.0],
            radii: [1.0, 2.0],
        });
        let parabola = Roi::Parabola(ParabolicRoi {
            vertex: [0.0, 0.0],
            focal_parameter: 1.0,
            angle: 0.0,
        });
        for roi in [ring, parabola] {
            assert!(!is_roi_supported(&roi));
            assert!(matches!(marshal_roi(&roi), Err(Error::UnsupportedVariant(_))));
        }
        assert!(matches!(
            unmarshal_roi(r#"{"type":"RingROI","centre":[0,0]}"#),
            Err(Error::UnsupportedVariant(_))
        ));
        assert!(matches!(unmarshal_roi(r#"{"radius":1}"#), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_function_round_trip() {
        let kinds = [
            FunctionKind::Gaussian,
            FunctionKind::Lorentzian,
            FunctionKind::PseudoVoigt,
            FunctionKind::StraightLine,
            FunctionKind::Quadratic,
            FunctionKind::Cubic,
            FunctionKind::Polynomial(5),
            FunctionKind::Offset,
            FunctionKind::Step,
        ];
        for kind in kinds {
            let values: Vec<f64> = (0..kind.parameter_count()).map(|i| i as f64 + 0.5).collect();
            let mut function = Function::with_values(kind, &values).unwrap().with_name("fit");
            if kind == FunctionKind::Gaussian {
                let params = vec![
                    Parameter::new("posn", 1.0).with_bounds(0.0, 2.0).with_fixed(true),
                    Parameter::new("fwhm", 0.1),
                    Parameter::new("area", 10.0),
                ];
                function = Function::with_parameters(kind, params).unwrap();
            }
            let json = marshal_function(&function).unwrap();
            assert_eq!(unmarshal_function(&json).unwrap(), function, "{json}");
        }
    }

    #[test]
    fn test_function_non_finite_values() {
        let params = vec![Parameter::new("c", f64::NAN).with_bounds(f64::NEG_INFINITY, f64::INFINITY)];
        let function = Function::with_parameters(FunctionKind::Offset, params).unwrap();
        let json = marshal_function(&function).unwrap();
        assert!(!json.contains("null"), "{json}");

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["parameters"][0]["lower"], "-Infinity");
        assert_eq!(value["parameters"][0]["upper"], "Infinity");

        let back = unmarshal_function(&json).unwrap();
        let p = &back.parameters()[0];
        assert!(p.value.is_nan());
        assert_eq!(p.lower, f64::NEG_INFINITY);
        assert_eq!(p.upper, f64::INFINITY);

        let bounded = Function::with_parameters(
            FunctionKind::Offset,
            vec![Parameter::new("c", 2.0).with_bounds(f64::NEG_INFINITY, 5.0)],
        )
        .unwrap();
        assert_eq!(unmarshal_function(&marshal_function(&bounded).unwrap()).unwrap(), bounded);

        let err = unmarshal_function(
            r#"{"type":"Offset","name":"o","parameters":[{"name":"c","value":"big","lower":0,"upper":1,"fixed":false}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_roi_validated_both_ways() {
        let err = marshal_roi(&Roi::point(f64::NAN, 1.0)).unwrap_err();
        assert!(matches!(err, Error::Core(nxstack_core::Error::InvalidParameters(_))));

        for json in [
            r#"{"type":"PolygonalROI","points":[[0,0],[1,1]]}"#,
            r#"{"type":"CircularROI","centre":[0,0],"radius":-2.0}"#,
            r#"{"type":"SectorROI","centre":[0,0],"radii":[5,1],"angles":[0,1]}"#,
        ] {
            assert!(
                matches!(unmarshal_roi(json), Err(Error::Core(nxstack_core::Error::InvalidParameters(_)))),
                "{json}"
            );
        }
    }

    #[test]
    fn test_function_unknown_type() {
        let err = unmarshal_function(r#"{"type":"Voigt","name":"v","parameters":[]}"#).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVariant(_)));
        let err = unmarshal_function(r#"{"type":"Polynomial","name":"p","parameters":[]}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_strip_brackets() {
        assert_eq!(strip_brackets("[{\"a\":[1]}]"), "{\"a\":[1]}");
        assert_eq!(strip_brackets("{}"), "{}");
        assert_eq!(strip_brackets("[2.0"), "[2.0");
    }
}
