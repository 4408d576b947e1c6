//! Sequential pipelines of element-wise stages.
//!
//! A pipeline description lists stages by operator id:
//!
//! ```toml
//! [[stage]]
//! operator = "clamp"
//! params = { lower = 0.0, upper = 255.0 }
//!
//! [[stage]]
//! operator = "mul"
//! params = { scalar = 2.0 }
//! config = { platform = "cuda", device = 0 }
//! ```
//!
//! Stages run one after another on the calling thread, each in place.

use crate::array::{DataArray, Operand};
use crate::core::error::{FilterError, FilterResult};
use crate::filters::config::FilterConfig;
use crate::filters::elementwise::{BinaryFilter, UnaryFilter};
use crate::filters::registry::{AnyOperator, OperatorRegistry, Params};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Description of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Operator id in the registry.
    pub operator: String,
    /// Operator parameters.
    #[serde(default)]
    pub params: Params,
    /// Platform, device and host options of the stage.
    #[serde(default)]
    pub config: FilterConfig,
}

impl StageSpec {
    /// Create a stage without parameters.
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            params: Params::new(),
            config: FilterConfig::default(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Set the stage configuration.
    pub fn with_config(mut self, config: FilterConfig) -> Self {
        self.config = config;
        self
    }
}

/// Description of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Stages in execution order.
    #[serde(rename = "stage", default)]
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    /// Parse from TOML.
    pub fn from_toml_str(text: &str) -> FilterResult<Self> {
        let spec: Self = toml::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse from JSON.
    pub fn from_json_str(text: &str) -> FilterResult<Self> {
        let spec: Self = serde_json::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> FilterResult<String> {
        toml::to_string(self).map_err(|e| FilterError::Config(e.to_string()))
    }

    /// Append a stage.
    pub fn push(&mut self, stage: StageSpec) {
        self.stages.push(stage);
    }

    fn validate(&self) -> FilterResult<()> {
        self.stages.iter().try_for_each(|stage| stage.config.validate())
    }
}

struct Stage {
    operator: AnyOperator,
    config: FilterConfig,
}

/// A built pipeline.
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Create every stage's operator from `registry`.
    pub fn build(spec: &PipelineSpec, registry: &OperatorRegistry) -> FilterResult<Self> {
        let stages = spec
            .stages
            .iter()
            .map(|stage| {
                Ok(Stage {
                    operator: registry.create(&stage.operator, &stage.params)?,
                    config: stage.config.clone(),
                })
            })
            .collect::<FilterResult<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether there are no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Operator names in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.operator.name()).collect()
    }

    /// Apply every stage to `array` in place.
    ///
    /// A stage that moves the array to another device leaves it there for the
    /// next stage.
    pub fn run(&self, array: &mut DataArray) -> FilterResult<()> {
        info!("Running pipeline of {} stages on {} tuples", self.stages.len(), array.tuples());
        for (index, stage) in self.stages.iter().enumerate() {
            debug!("Stage {}: {}", index, stage.operator.name());
            match &stage.operator {
                AnyOperator::Unary(op) => UnaryFilter::in_place(op.as_ref())
                    .with_config(stage.config.clone())
                    .process(array)?,
                AnyOperator::Binary { op, scalar } => BinaryFilter::in_place(op.as_ref())
                    .with_config(stage.config.clone())
                    .process(array, Operand::Scalar(*scalar))?,
            }
        }
        Ok(())
    }
}
