use burn::config::Config;

use crate::{error::GruError, shape::GruShape};

/// Deepest read-ahead the gate pipeline accepts. Every level costs one
/// register tile per operand stream.
pub const MAX_PREFETCH_DISTANCE: usize = 8;

/// Tile shape the fused kernel is compiled for.
#[allow(clippy::expl_impl_clone_on_copy)]
#[derive(Config, Debug, PartialEq, Eq, Copy)]
pub enum GruTiling {
    /// 16 batch rows and 32 output columns per cube, 32 units.
    Wide,
    /// 4 batch rows and 8 output columns per cube, 4 units. Suits tiny
    /// problems and exercises ragged tiles.
    Narrow,
}

/// Problem description for the GRU backward-data pass.
#[derive(Config, Debug, PartialEq)]
pub struct GruBackwardConfig {
    /// Sequences per batch (`B`).
    pub batch_size: usize,
    /// Width of the layer-0 input (`I`).
    pub input_size: usize,
    /// Width of the hidden state (`H`).
    pub hidden_size: usize,
    /// Number of time steps (`T`).
    pub sequence_length: usize,
    /// Number of stacked layers (`L`).
    pub layer_size: usize,
    /// Dropout probability used between layers in the forward pass.
    #[config(default = 0.0)]
    pub dropout: f32,
    /// Tiles requested ahead of the blocking load in the gate pipeline.
    #[config(default = 3)]
    pub prefetch_distance: usize,
    #[config(default = "GruTiling::Wide")]
    pub tiling: GruTiling,
}

impl GruBackwardConfig {
    pub fn validate(&self) -> Result<(), GruError> {
        let sizes = [
            ("batch_size", self.batch_size),
            ("input_size", self.input_size),
            ("hidden_size", self.hidden_size),
            ("sequence_length", self.sequence_length),
            ("layer_size", self.layer_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(GruError::InvalidConfig(format!("{name} must be non-zero")));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(GruError::InvalidDropout(self.dropout));
        }
        if self.prefetch_distance > MAX_PREFETCH_DISTANCE {
            return Err(GruError::InvalidConfig(format!(
                "prefetch_distance {} exceeds {MAX_PREFETCH_DISTANCE}",
                self.prefetch_distance
            )));
        }
        Ok(())
    }

    /// Whether the inter-layer dropout rescale runs at all.
    #[must_use]
    pub fn applies_dropout(&self) -> bool {
        self.dropout > 0.0 && self.layer_size > 1
    }

    /// `1 / (1 - p)`.
    #[must_use]
    pub fn dropout_scale(&self) -> f32 {
        1.0 / (1.0 - self.dropout)
    }

    #[must_use]
    pub fn shape(&self) -> GruShape {
        GruShape::from_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn config() -> GruBackwardConfig {
        GruBackwardConfig::new(2, 3, 4, 5, 2)
    }

    #[test]
    fn defaults() {
        let c = config();
        assert_eq!(c.dropout, 0.0);
        assert_eq!(c.prefetch_distance, 3);
        assert_eq!(c.tiling, GruTiling::Wide);
        assert!(!c.applies_dropout());
        assert!(c.validate().is_ok());
    }

    #[test_case(-0.1 ; "negative")]
    #[test_case(1.0 ; "one")]
    #[test_case(f32::NAN ; "nan")]
    fn rejects_dropout(p: f32) {
        assert!(matches!(
            config().with_dropout(p).validate(),
            Err(GruError::InvalidDropout(_))
        ));
    }

    #[test]
    fn rejects_zero_sizes() {
        let err = GruBackwardConfig::new(2, 3, 0, 5, 2).validate().unwrap_err();
        assert_eq!(
            err,
            GruError::InvalidConfig("hidden_size must be non-zero".into())
        );
    }

    #[test_case(0 ; "none")]
    #[test_case(MAX_PREFETCH_DISTANCE ; "deepest")]
    fn accepts_prefetch_distance(depth: usize) {
        assert!(config().with_prefetch_distance(depth).validate().is_ok());
    }

    #[test_case(MAX_PREFETCH_DISTANCE + 1 ; "one_past")]
    #[test_case(usize::MAX ; "unbounded")]
    fn rejects_prefetch_distance(depth: usize) {
        assert_eq!(
            config().with_prefetch_distance(depth).validate(),
            Err(GruError::InvalidConfig(format!(
                "prefetch_distance {depth} exceeds {MAX_PREFETCH_DISTANCE}"
            )))
        );
    }

    #[test]
    fn dropout_only_between_layers() {
        assert!(config().with_dropout(0.5).applies_dropout());
        let single = GruBackwardConfig::new(2, 3, 4, 5, 1).with_dropout(0.5);
        assert!(!single.applies_dropout());
        assert_eq!(config().with_dropout(0.5).dropout_scale(), 2.0);
    }

    #[test]
    fn displays_as_json() {
        let c = config()
            .with_dropout(0.25)
            .with_prefetch_distance(1)
            .with_tiling(GruTiling::Narrow);
        let json: String = c.to_string().split_whitespace().collect();
        assert!(json.contains("\"prefetch_distance\":1"), "{json}");
        assert!(json.contains("Narrow"), "{json}");
        assert!(json.contains("\"dropout\":0.25"), "{json}");
    }
}
