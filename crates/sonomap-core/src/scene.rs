//! Scene model: immutable study-area state shared by every worker.

use glam::{DVec2, DVec3};
use tracing::debug;

use relief::{Bounds, Relief, ReliefError};

use crate::atmosphere::AttenuationParameters;
use crate::directivity::DirectivityProvider;
use crate::orientation::Orientation;
use crate::spectrum::Spectrum;

/// Scene construction failures.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// The obstruction substrate rejected the geometry.
    #[error("invalid geometry: {0}")]
    Geometry(#[from] ReliefError),
    /// A source or receiver coordinate is NaN or infinite.
    #[error("non-finite coordinate on {0} {1}")]
    NonFiniteCoordinate(&'static str, u64),
    /// A line source needs at least two vertices.
    #[error("line source {0} has fewer than 2 vertices")]
    DegenerateLineSource(u64),
    /// A configuration field is out of range.
    #[error("config: {0}")]
    Config(String),
}

/// Per-scene search options. Immutable once the scene is built; every field
/// has a default so partial initialisation reads naturally with struct
/// update syntax.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SceneConfig {
    /// Maximum number of successive wall reflections.
    pub reflection_order: u32,
    /// Sources beyond this 3D distance from a receiver are ignored, metres.
    pub max_source_distance: f64,
    /// Walls beyond this distance from a receiver cannot reflect, metres.
    pub max_reflection_distance: f64,
    /// Search for paths bending horizontally around vertical edges.
    pub horizontal_diffraction: bool,
    /// Allow diffraction over obstacle tops on reflection legs.
    pub vertical_diffraction: bool,
    /// Apply the body-barrier correction for low screens close to sources.
    pub body_barrier: bool,
    /// Ground coefficient outside every ground zone.
    pub default_ground: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            reflection_order: 1,
            max_source_distance: 1200.0,
            max_reflection_distance: 50.0,
            horizontal_diffraction: true,
            vertical_diffraction: true,
            body_barrier: false,
            default_ground: 0.0,
        }
    }
}

impl SceneConfig {
    fn validate(&self) -> Result<(), SceneError> {
        if !(self.max_source_distance > 0.0) {
            return Err(SceneError::Config(format!(
                "max_source_distance must be positive, got {}",
                self.max_source_distance
            )));
        }
        if !(self.max_reflection_distance >= 0.0) {
            return Err(SceneError::Config(format!(
                "max_reflection_distance must be non-negative, got {}",
                self.max_reflection_distance
            )));
        }
        if !(0.0..=1.0).contains(&self.default_ground) {
            return Err(SceneError::Config(format!(
                "default_ground must be in [0, 1], got {}",
                self.default_ground
            )));
        }
        Ok(())
    }
}

/// Source geometry: a fixed point or a polyline to be split into samples.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SourceGeometry {
    /// Point emission at an absolute position (z relative to ground at build).
    Point(DVec3),
    /// Line emission along a polyline; split adaptively per receiver.
    Line(Vec<DVec3>),
}

/// An emitting source.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Source {
    /// Stable caller-assigned identifier.
    pub id: u64,
    /// Emission geometry; `z` is height above local ground.
    pub geometry: SourceGeometry,
    /// Per-band emission power level, dB re 1 pW.
    pub power: Spectrum,
    /// Emission frame orientation; `None` means omnidirectional placement.
    pub orientation: Option<Orientation>,
    /// Directivity pattern identifier resolved through the provider.
    pub directivity: Option<u32>,
}

impl Source {
    /// Point source with the given power spectrum.
    #[must_use]
    pub fn point(id: u64, position: DVec3, power: Spectrum) -> Self {
        Self {
            id,
            geometry: SourceGeometry::Point(position),
            power,
            orientation: None,
            directivity: None,
        }
    }

    /// Line source along a polyline.
    #[must_use]
    pub fn line(id: u64, path: Vec<DVec3>, power: Spectrum) -> Self {
        Self {
            id,
            geometry: SourceGeometry::Line(path),
            power,
            orientation: None,
            directivity: None,
        }
    }
}

/// A reception point.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Receiver {
    /// Stable caller-assigned identifier.
    pub id: u64,
    /// Position; `z` is height above local ground.
    pub position: DVec3,
}

/// One emission sample: a point source, or one sample of a split line
/// source, with its power weight.
#[derive(Debug, Clone)]
pub struct SourceSample {
    /// Index into [`Scene::sources`].
    pub source_idx: usize,
    /// Absolute emission position.
    pub position: DVec3,
    /// Length of line represented by this sample, metres; 1.0 for points.
    pub li: f64,
    /// Orientation of the sample (line direction for line sources).
    pub orientation: Option<Orientation>,
}

/// Immutable scene: substrate, sources, receivers, configuration and
/// meteorology. Shared by reference across worker threads.
pub struct Scene {
    /// Obstruction substrate.
    pub relief: Relief,
    /// Emitting sources, absolute heights resolved.
    pub sources: Vec<Source>,
    /// Reception points, absolute heights resolved.
    pub receivers: Vec<Receiver>,
    /// Search options.
    pub config: SceneConfig,
    /// Meteorological state.
    pub parameters: AttenuationParameters,
    /// Directivity pattern lookup.
    pub directivity: Box<dyn DirectivityProvider>,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("sources", &self.sources.len())
            .field("receivers", &self.receivers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scene {
    /// Start building a scene.
    #[must_use]
    pub fn builder() -> SceneBuilder {
        SceneBuilder::default()
    }

    /// Horizontal extent of the substrate grown to cover sources and
    /// receivers.
    #[must_use]
    pub fn extent(&self) -> Bounds {
        let mut bounds = self.relief.extent();
        for source in &self.sources {
            match &source.geometry {
                SourceGeometry::Point(p) => bounds = bounds.including(p.truncate()),
                SourceGeometry::Line(path) => {
                    for p in path {
                        bounds = bounds.including(p.truncate());
                    }
                }
            }
        }
        for receiver in &self.receivers {
            bounds = bounds.including(receiver.position.truncate());
        }
        bounds
    }

    /// Expand a source into emission samples for one receiver.
    ///
    /// Point sources yield a single unit-weight sample. Line sources are cut
    /// into pieces no longer than `max(1, d/2)` where `d` is the distance
    /// from the receiver to the closest point of the line; each sample sits
    /// at a piece midpoint and carries the piece length as its power weight.
    #[must_use]
    pub fn expand_source(&self, source_idx: usize, receiver: DVec3) -> Vec<SourceSample> {
        let source = &self.sources[source_idx];
        match &source.geometry {
            SourceGeometry::Point(p) => vec![SourceSample {
                source_idx,
                position: *p,
                li: 1.0,
                orientation: source.orientation,
            }],
            SourceGeometry::Line(path) => {
                let nearest = path
                    .windows(2)
                    .map(|pair| segment_distance(receiver, pair[0], pair[1]))
                    .fold(f64::INFINITY, f64::min);
                let max_piece = (nearest / 2.0).max(1.0);
                split_polyline(path, max_piece)
                    .into_iter()
                    .map(|(position, li, direction)| SourceSample {
                        source_idx,
                        position,
                        li,
                        orientation: Some(combine_orientation(
                            source.orientation,
                            direction,
                        )),
                    })
                    .collect()
            }
        }
    }
}

/// Distance from `p` to the 3D segment `[a, b]`.
fn segment_distance(p: DVec3, a: DVec3, b: DVec3) -> f64 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 < 1e-18 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// Cut a polyline into pieces no longer than `max_piece`, returning the
/// midpoint, length and direction of each piece.
fn split_polyline(path: &[DVec3], max_piece: f64) -> Vec<(DVec3, f64, DVec3)> {
    let mut out = Vec::new();
    for pair in path.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let len = a.distance(b);
        if len < 1e-9 {
            continue;
        }
        let pieces = (len / max_piece).ceil().max(1.0) as usize;
        let dir = (b - a) / len;
        let piece_len = len / pieces as f64;
        for i in 0..pieces {
            let mid = a + dir * piece_len * (i as f64 + 0.5);
            out.push((mid, piece_len, dir));
        }
    }
    out
}

/// Rotate a line-sample frame by the segment direction so yaw 0 points down
/// the line.
fn combine_orientation(base: Option<Orientation>, direction: DVec3) -> Orientation {
    let along = Orientation::from_vector(direction.normalize_or_zero(), 0.0);
    match base {
        None => along,
        Some(o) => Orientation::new(along.yaw + o.yaw, along.pitch + o.pitch, o.roll),
    }
}

/// Accumulates scene inputs and validates them into a [`Scene`].
#[derive(Default)]
pub struct SceneBuilder {
    relief: Option<ReliefBuilderInput>,
    sources: Vec<Source>,
    receivers: Vec<Receiver>,
    config: SceneConfig,
    parameters: AttenuationParameters,
    directivity: Option<Box<dyn DirectivityProvider>>,
}

enum ReliefBuilderInput {
    Builder(relief::ReliefBuilder),
    Built(Relief),
}

impl Default for ReliefBuilderInput {
    fn default() -> Self {
        Self::Builder(Relief::builder())
    }
}

impl SceneBuilder {
    /// Supply a pre-built substrate.
    #[must_use]
    pub fn relief(mut self, relief: Relief) -> Self {
        self.relief = Some(ReliefBuilderInput::Built(relief));
        self
    }

    /// Supply substrate geometry via a relief builder.
    #[must_use]
    pub fn relief_builder(mut self, builder: relief::ReliefBuilder) -> Self {
        self.relief = Some(ReliefBuilderInput::Builder(builder));
        self
    }

    /// Add a source.
    #[must_use]
    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a receiver.
    #[must_use]
    pub fn receiver(mut self, receiver: Receiver) -> Self {
        self.receivers.push(receiver);
        self
    }

    /// Set the search options.
    #[must_use]
    pub fn config(mut self, config: SceneConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the meteorological state.
    #[must_use]
    pub fn parameters(mut self, parameters: AttenuationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the directivity provider.
    #[must_use]
    pub fn directivity(mut self, provider: Box<dyn DirectivityProvider>) -> Self {
        self.directivity = Some(provider);
        self
    }

    /// Validate inputs, resolve relative heights to absolute altitudes and
    /// freeze the scene.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError`] for invalid geometry, non-finite coordinates,
    /// degenerate line sources or out-of-range configuration.
    pub fn build(self) -> Result<Scene, SceneError> {
        self.config.validate()?;
        let relief = match self.relief.unwrap_or_default() {
            ReliefBuilderInput::Built(r) => r,
            ReliefBuilderInput::Builder(b) => {
                b.default_ground(self.config.default_ground).build()?
            }
        };

        let finite = |p: &DVec3| p.x.is_finite() && p.y.is_finite() && p.z.is_finite();
        let mut sources = self.sources;
        for source in &mut sources {
            match &mut source.geometry {
                SourceGeometry::Point(p) => {
                    if !finite(p) {
                        return Err(SceneError::NonFiniteCoordinate("source", source.id));
                    }
                    p.z += relief.height_at(p.truncate());
                }
                SourceGeometry::Line(path) => {
                    if path.len() < 2 {
                        return Err(SceneError::DegenerateLineSource(source.id));
                    }
                    for p in path.iter_mut() {
                        if !finite(p) {
                            return Err(SceneError::NonFiniteCoordinate("source", source.id));
                        }
                        p.z += relief.height_at(p.truncate());
                    }
                }
            }
        }
        let mut receivers = self.receivers;
        for receiver in &mut receivers {
            if !finite(&receiver.position) {
                return Err(SceneError::NonFiniteCoordinate("receiver", receiver.id));
            }
            receiver.position.z += relief.height_at(receiver.position.truncate());
        }

        debug!(
            sources = sources.len(),
            receivers = receivers.len(),
            walls = relief.walls().len(),
            "scene built"
        );
        Ok(Scene {
            relief,
            sources,
            receivers,
            config: self.config,
            parameters: self.parameters,
            directivity: self
                .directivity
                .unwrap_or_else(|| Box::new(crate::directivity::Omnidirectional)),
        })
    }
}

/// Convenience: expand a 2D position with a relative height into an absolute
/// point on the given substrate.
#[must_use]
pub fn above_ground(relief: &Relief, xy: DVec2, height: f64) -> DVec3 {
    xy.extend(relief.height_at(xy) + height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::SPECTRUM_SIZE;

    fn power() -> Spectrum {
        [93.0; SPECTRUM_SIZE]
    }

    #[test]
    fn test_build_resolves_heights() {
        let scene = Scene::builder()
            .source(Source::point(1, DVec3::new(0.0, 0.0, 1.0), power()))
            .receiver(Receiver {
                id: 1,
                position: DVec3::new(200.0, 0.0, 4.0),
            })
            .build()
            .unwrap();
        // Flat fallback ground: absolute z equals relative height.
        assert!((scene.receivers[0].position.z - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_finite() {
        let err = Scene::builder()
            .source(Source::point(7, DVec3::new(f64::NAN, 0.0, 1.0), power()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SceneError::NonFiniteCoordinate("source", 7)));
    }

    #[test]
    fn test_rejects_degenerate_line() {
        let err = Scene::builder()
            .source(Source::line(3, vec![DVec3::ZERO], power()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SceneError::DegenerateLineSource(3)));
    }

    #[test]
    fn test_config_validation() {
        let err = Scene::builder()
            .config(SceneConfig {
                max_source_distance: -5.0,
                ..SceneConfig::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, SceneError::Config(_)));
    }

    #[test]
    fn test_line_source_split_density() {
        let scene = Scene::builder()
            .source(Source::line(
                1,
                vec![DVec3::new(0.0, 0.0, 0.5), DVec3::new(100.0, 0.0, 0.5)],
                power(),
            ))
            .receiver(Receiver {
                id: 1,
                position: DVec3::new(50.0, 20.0, 4.0),
            })
            .build()
            .unwrap();
        let receiver = scene.receivers[0].position;
        let samples = scene.expand_source(0, receiver);
        // Nearest line point ~20 m away: pieces no longer than 10 m.
        assert!(samples.len() >= 10);
        let total: f64 = samples.iter().map(|s| s.li).sum();
        assert!((total - 100.0).abs() < 1e-9);
        for sample in &samples {
            assert!(sample.li <= 10.0 + 1e-9);
        }
    }

    #[test]
    fn test_close_receiver_splits_finer() {
        let scene = Scene::builder()
            .source(Source::line(
                1,
                vec![DVec3::new(0.0, 0.0, 0.5), DVec3::new(100.0, 0.0, 0.5)],
                power(),
            ))
            .build()
            .unwrap();
        let far = scene.expand_source(0, DVec3::new(50.0, 200.0, 4.0));
        let near = scene.expand_source(0, DVec3::new(50.0, 4.0, 4.0));
        assert!(near.len() > far.len());
    }
}
