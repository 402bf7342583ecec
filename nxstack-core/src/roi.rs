//! Regions of interest.
//!
//! Coordinates are in data pixels, angles in radians. `Roi` is a closed set
//! of shapes; only some of them have a persisted JSON form.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single point.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointRoi {
    pub point: [f64; 2],
}

/// Line segment from `start` to `end`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineRoi {
    pub start: [f64; 2],
    pub end: [f64; 2],
}

/// Rectangle anchored at `start`, rotated by `angle` about it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RectangularRoi {
    pub start: [f64; 2],
    pub lengths: [f64; 2],
    pub angle: f64,
}

/// Annular sector: inner/outer radius and start/end angle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SectorRoi {
    pub centre: [f64; 2],
    pub radii: [f64; 2],
    pub angles: [f64; 2],
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CircularRoi {
    pub centre: [f64; 2],
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EllipticalRoi {
    pub centre: [f64; 2],
    pub semi_axes: [f64; 2],
    pub angle: f64,
}

/// Closed polygon through `points`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolygonalRoi {
    pub points: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RingRoi {
    pub centre: [f64; 2],
    pub radii: [f64; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParabolicRoi {
    pub vertex: [f64; 2],
    pub focal_parameter: f64,
    pub angle: f64,
}

/// Region of interest.
#[derive(Debug, Clone, PartialEq)]
pub enum Roi {
    Point(PointRoi),
    Line(LineRoi),
    Rectangle(RectangularRoi),
    Sector(SectorRoi),
    Circle(CircularRoi),
    Ellipse(EllipticalRoi),
    Polygon(PolygonalRoi),
    Ring(RingRoi),
    Parabola(ParabolicRoi),
}

/// Discriminant of [`Roi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoiKind {
    Point,
    Line,
    Rectangle,
    Sector,
    Circle,
    Ellipse,
    Polygon,
    Ring,
    Parabola,
}

impl Roi {
    #[must_use]
    pub fn kind(&self) -> RoiKind {
        match self {
            Roi::Point(_) => RoiKind::Point,
            Roi::Line(_) => RoiKind::Line,
            Roi::Rectangle(_) => RoiKind::Rectangle,
            Roi::Sector(_) => RoiKind::Sector,
            Roi::Circle(_) => RoiKind::Circle,
            Roi::Ellipse(_) => RoiKind::Ellipse,
            Roi::Polygon(_) => RoiKind::Polygon,
            Roi::Ring(_) => RoiKind::Ring,
            Roi::Parabola(_) => RoiKind::Parabola,
        }
    }

    /// Point ROI.
    #[must_use]
    pub fn point(x: f64, y: f64) -> Self {
        Roi::Point(PointRoi { point: [x, y] })
    }

    /// Circle ROI.
    ///
    /// # Errors
    /// Returns an error if the radius is negative or not finite.
    pub fn circle(centre: [f64; 2], radius: f64) -> Result<Self> {
        Roi::Circle(CircularRoi { centre, radius }).validated()
    }

    /// Rectangle ROI.
    ///
    /// # Errors
    /// Returns an error if a side length is negative or not finite.
    pub fn rectangle(start: [f64; 2], lengths: [f64; 2], angle: f64) -> Result<Self> {
        Roi::Rectangle(RectangularRoi {
            start,
            lengths,
            angle,
        })
        .validated()
    }

    /// Sector ROI.
    ///
    /// # Errors
    /// Returns an error if the radii are negative or inner exceeds outer.
    pub fn sector(centre: [f64; 2], radii: [f64; 2], angles: [f64; 2]) -> Result<Self> {
        Roi::Sector(SectorRoi {
            centre,
            radii,
            angles,
        })
        .validated()
    }

    /// Polygon ROI.
    ///
    /// # Errors
    /// Returns an error for fewer than three vertices.
    pub fn polygon(points: Vec<[f64; 2]>) -> Result<Self> {
        Roi::Polygon(PolygonalRoi { points }).validated()
    }

    /// Checks that every coordinate is finite and that lengths and radii
    /// are non-negative, with inner radii not above outer ones and at least
    /// three polygon vertices.
    ///
    /// # Errors
    /// Returns `InvalidParameters` naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        match self {
            Roi::Point(p) => check_finite("point", &p.point),
            Roi::Line(l) => {
                check_finite("start", &l.start)?;
                check_finite("end", &l.end)
            }
            Roi::Rectangle(r) => {
                check_finite("start", &r.start)?;
                check_finite("angle", &[r.angle])?;
                check_non_negative("width", r.lengths[0])?;
                check_non_negative("height", r.lengths[1])
            }
            Roi::Sector(SectorRoi {
                centre,
                radii,
                angles,
            }) => {
                check_finite("centre", centre)?;
                check_finite("angles", angles)?;
                check_radii(*radii)
            }
            Roi::Ring(RingRoi { centre, radii }) => {
                check_finite("centre", centre)?;
                check_radii(*radii)
            }
            Roi::Circle(c) => {
                check_finite("centre", &c.centre)?;
                check_non_negative("radius", c.radius)
            }
            Roi::Ellipse(e) => {
                check_finite("centre", &e.centre)?;
                check_finite("angle", &[e.angle])?;
                check_non_negative("semi-axis", e.semi_axes[0])?;
                check_non_negative("semi-axis", e.semi_axes[1])
            }
            Roi::Polygon(p) => {
                if p.points.len() < 3 {
                    return Err(Error::InvalidParameters(format!(
                        "polygon needs at least 3 points, got {}",
                        p.points.len()
                    )));
                }
                p.points.iter().try_for_each(|point| check_finite("vertex", point))
            }
            Roi::Parabola(p) => {
                check_finite("vertex", &p.vertex)?;
                check_finite("angle", &[p.angle])?;
                check_non_negative("focal parameter", p.focal_parameter)
            }
        }
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Axis-aligned bounding box as `(min, max)`.
    #[must_use]
    pub fn bounds(&self) -> ([f64; 2], [f64; 2]) {
        match self {
            Roi::Point(p) => (p.point, p.point),
            Roi::Line(l) => bounds_of(&[l.start, l.end]),
            Roi::Rectangle(r) => {
                let (s, c) = r.angle.sin_cos();
                let [w, h] = r.lengths;
                let [x, y] = r.start;
                bounds_of(&[
                    [x, y],
                    [x + w * c, y + w * s],
                    [x - h * s, y + h * c],
                    [x + w * c - h * s, y + w * s + h * c],
                ])
            }
            Roi::Sector(SectorRoi { centre, radii, .. }) | Roi::Ring(RingRoi { centre, radii }) => {
                square_around(*centre, radii[1])
            }
            Roi::Circle(c) => square_around(c.centre, c.radius),
            Roi::Ellipse(e) => square_around(e.centre, e.semi_axes[0].max(e.semi_axes[1])),
            Roi::Polygon(p) => bounds_of(&p.points),
            Roi::Parabola(p) => (p.vertex, p.vertex),
        }
    }
}

fn check_finite(what: &str, values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(v) => Err(Error::InvalidParameters(format!("{what} must be finite, got {v}"))),
        None => Ok(()),
    }
}

fn check_radii(radii: [f64; 2]) -> Result<()> {
    check_non_negative("inner radius", radii[0])?;
    check_non_negative("outer radius", radii[1])?;
    if radii[0] > radii[1] {
        return Err(Error::InvalidParameters(format!(
            "inner radius {} exceeds outer radius {}",
            radii[0], radii[1]
        )));
    }
    Ok(())
}

fn check_non_negative(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameters(format!(
            "{what} must be finite and non-negative, got {value}"
        )))
    }
}

fn square_around(centre: [f64; 2], r: f64) -> ([f64; 2], [f64; 2]) {
    ([centre[0] - r, centre[1] - r], [centre[0] + r, centre[1] + r])
}

fn bounds_of(points: &[[f64; 2]]) -> ([f64; 2], [f64; 2]) {
    let mut min = [f64::INFINITY; 2];
    let mut max = [f64::NEG_INFINITY; 2];
    for p in points {
        for i in 0..2 {
            min[i] = min[i].min(p[i]);
            max[i] = max[i].max(p[i]);
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kind() {
        assert_eq!(Roi::point(1.0, 2.0).kind(), RoiKind::Point);
        assert_eq!(
            Roi::Ring(RingRoi {
                centre: [0.0, 0.0],
                radii: [1.0, 2.0]
            })
            .kind(),
            RoiKind::Ring
        );
    }

    #[test]
    fn test_constructors_validate() {
        assert!(Roi::circle([0.0, 0.0], -1.0).is_err());
        assert!(Roi::circle([0.0, 0.0], f64::NAN).is_err());
        assert!(Roi::sector([0.0, 0.0], [5.0, 2.0], [0.0, 1.0]).is_err());
        assert!(Roi::polygon(vec![[0.0, 0.0], [1.0, 1.0]]).is_err());
        assert!(Roi::rectangle([0.0, 0.0], [2.0, 3.0], 0.0).is_ok());
        assert!(Roi::circle([f64::INFINITY, 0.0], 1.0).is_err());
    }

    #[test]
    fn test_validate_struct_literals() {
        assert!(Roi::point(f64::NAN, 0.0).validate().is_err());
        let ellipse = Roi::Ellipse(EllipticalRoi {
            centre: [0.0, 0.0],
            semi_axes: [2.0, -1.0],
            angle: 0.0,
        });
        assert!(matches!(ellipse.validate(), Err(Error::InvalidParameters(_))));
        let ring = Roi::Ring(RingRoi {
            centre: [0.0, 0.0],
            radii: [3.0, 1.0],
        });
        assert!(ring.validate().is_err());
        let polygon = Roi::Polygon(PolygonalRoi {
            points: vec![[0.0, 0.0], [1.0, 0.0]],
        });
        assert!(polygon.validate().is_err());
        assert!(Roi::point(1.0, 2.0).validate().is_ok());
    }

    #[test]
    fn test_rotated_rectangle_bounds() {
        let r = Roi::rectangle([0.0, 0.0], [2.0, 1.0], std::f64::consts::FRAC_PI_2).unwrap();
        let (min, max) = r.bounds();
        assert_relative_eq!(min[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(max[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(min[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(max[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_polygon_bounds() {
        let p = Roi::polygon(vec![[1.0, 5.0], [-2.0, 0.5], [3.0, 2.0]]).unwrap();
        assert_eq!(p.bounds(), ([-2.0, 0.5], [3.0, 5.0]));
    }
}
