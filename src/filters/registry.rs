//! Operator registry for building element-wise stages by name.

use crate::core::error::{FilterError, FilterResult};
use crate::filters::operators::{BinaryKernel, BinaryOperator, UnaryKernel, UnaryOperator};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Named numeric parameters of an operator.
pub type Params = IndexMap<String, f64>;

/// Factory function for creating operator instances.
pub type OperatorFactory = Arc<dyn Fn(&Params) -> FilterResult<AnyOperator> + Send + Sync>;

/// An operator ready to be applied by a stage.
pub enum AnyOperator {
    /// Unary operator.
    Unary(Box<dyn UnaryOperator>),
    /// Binary operator with its scalar right operand.
    Binary {
        /// The operator
        op: Box<dyn BinaryOperator>,
        /// Right operand applied to every tuple
        scalar: f64,
    },
}

impl AnyOperator {
    /// Operator name.
    pub fn name(&self) -> &str {
        match self {
            AnyOperator::Unary(op) => op.name(),
            AnyOperator::Binary { op, .. } => op.name(),
        }
    }
}

impl fmt::Debug for AnyOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyOperator::Unary(op) => f.debug_tuple("Unary").field(&op.name()).finish(),
            AnyOperator::Binary { op, scalar } => f
                .debug_struct("Binary")
                .field("op", &op.name())
                .field("scalar", scalar)
                .finish(),
        }
    }
}

/// Registry entry containing the factory and its description.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Factory function to create instances.
    pub factory: OperatorFactory,
    /// One-line description.
    pub description: String,
    /// Parameters the factory requires.
    pub params: Vec<String>,
    /// Whether this operator can be created.
    pub enabled: bool,
}

/// Registry of operators available to pipelines, in registration order.
pub struct OperatorRegistry {
    operators: IndexMap<String, RegistryEntry>,
}

impl OperatorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            operators: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with the builtin operators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Register an operator under `id`, replacing any previous one.
    pub fn register<F>(&mut self, id: impl Into<String>, description: impl Into<String>, params: &[&str], factory: F)
    where
        F: Fn(&Params) -> FilterResult<AnyOperator> + Send + Sync + 'static,
    {
        let entry = RegistryEntry {
            factory: Arc::new(factory),
            description: description.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            enabled: true,
        };
        self.operators.insert(id.into(), entry);
    }

    /// Create an operator by id.
    ///
    /// Fails when the id is unknown or disabled, or a required parameter is missing.
    pub fn create(&self, id: &str, params: &Params) -> FilterResult<AnyOperator> {
        let entry = self
            .operators
            .get(id)
            .filter(|e| e.enabled)
            .ok_or_else(|| FilterError::Config(format!("unknown operator '{}'", id)))?;
        if let Some(missing) = entry.params.iter().find(|p| !params.contains_key(*p)) {
            return Err(FilterError::Config(format!(
                "operator '{}' requires parameter '{}'",
                id, missing
            )));
        }
        (entry.factory)(params)
    }

    /// Get a registry entry.
    pub fn get_entry(&self, id: &str) -> Option<&RegistryEntry> {
        self.operators.get(id)
    }

    /// Check if an operator is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.operators.contains_key(id)
    }

    /// Get all registered ids.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(|s| s.as_str())
    }

    /// Search operators by id or description.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.operators
            .iter()
            .filter(|(id, entry)| {
                id.to_lowercase().contains(&query)
                    || entry.description.to_lowercase().contains(&query)
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Enable or disable an operator.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        if let Some(entry) = self.operators.get_mut(id) {
            entry.enabled = enabled;
            true
        } else {
            false
        }
    }

    /// Unregister an operator.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.operators.shift_remove(id).is_some()
    }

    /// Get the number of registered operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn param(params: &Params, name: &str) -> FilterResult<f64> {
    params
        .get(name)
        .copied()
        .ok_or_else(|| FilterError::Config(format!("missing parameter '{}'", name)))
}

fn register_builtins(registry: &mut OperatorRegistry) {
    registry.register("fill", "Set every component to a constant", &["value"], |p| {
        Ok(AnyOperator::Unary(Box::new(UnaryKernel::Fill {
            value: param(p, "value")?,
        })))
    });
    registry.register(
        "clamp",
        "Clamp components into [lower, upper]",
        &["lower", "upper"],
        |p| {
            let (lower, upper) = (param(p, "lower")?, param(p, "upper")?);
            if lower > upper {
                return Err(FilterError::Config(format!(
                    "clamp bounds {} > {}",
                    lower, upper
                )));
            }
            Ok(AnyOperator::Unary(Box::new(UnaryKernel::Clamp { lower, upper })))
        },
    );
    registry.register("abs", "Absolute value", &[], |_| {
        Ok(AnyOperator::Unary(Box::new(UnaryKernel::Abs)))
    });
    registry.register(
        "mask-outside",
        "Mark tuples with a component outside [lower, upper] Passive",
        &["lower", "upper"],
        |p| {
            Ok(AnyOperator::Unary(Box::new(UnaryKernel::MaskOutside {
                lower: param(p, "lower")?,
                upper: param(p, "upper")?,
            })))
        },
    );
    registry.register("reset-status", "Mark every tuple Active", &[], |_| {
        Ok(AnyOperator::Unary(Box::new(UnaryKernel::ResetStatus)))
    });
    registry.register("negate-status", "Flip the status of every tuple", &[], |_| {
        Ok(AnyOperator::Unary(Box::new(UnaryKernel::NegateStatus)))
    });

    for kernel in BinaryKernel::ALL {
        registry.register(
            kernel.id(),
            format!("Element-wise {} with a scalar", kernel.id()),
            &["scalar"],
            move |p| {
                Ok(AnyOperator::Binary {
                    op: Box::new(kernel),
                    scalar: param(p, "scalar")?,
                })
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scalar::Status;
    use crate::filters::operators::HostUnary;

    fn params(pairs: &[(&str, f64)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_builtins_in_order() {
        let registry = OperatorRegistry::with_builtins();
        let ids: Vec<&str> = registry.ids().collect();
        assert_eq!(ids[0], "fill");
        assert_eq!(ids.len(), 12);
        assert!(registry.contains("mask-outside"));
        assert!(registry.contains("div"));
    }

    #[test]
    fn test_create_with_params() {
        let registry = OperatorRegistry::with_builtins();
        let op = registry.create("clamp", &params(&[("lower", 0.0), ("upper", 1.0)])).unwrap();
        assert_eq!(op.name(), "clamp");
        match registry.create("mul", &params(&[("scalar", 3.0)])).unwrap() {
            AnyOperator::Binary { op, scalar } => {
                assert_eq!(op.kernel(), Some(BinaryKernel::Mul));
                assert_eq!(scalar, 3.0);
            }
            other => panic!("expected binary operator, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_param() {
        let registry = OperatorRegistry::with_builtins();
        assert!(matches!(
            registry.create("fill", &Params::new()),
            Err(FilterError::Config(_))
        ));
        assert!(registry
            .create("clamp", &params(&[("lower", 2.0), ("upper", 1.0)]))
            .is_err());
        assert!(registry.create("nope", &Params::new()).is_err());
    }

    #[test]
    fn test_custom_operator() {
        let mut registry = OperatorRegistry::new();
        registry.register("square", "Square each component", &[], |_| {
            Ok(AnyOperator::Unary(Box::new(HostUnary::new(
                "square",
                |v: f64, _: &mut Status| v * v,
            ))))
        });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.search("SQUARE"), vec!["square"]);

        registry.set_enabled("square", false);
        assert!(registry.create("square", &Params::new()).is_err());
        assert!(registry.unregister("square"));
        assert!(registry.is_empty());
    }
}
