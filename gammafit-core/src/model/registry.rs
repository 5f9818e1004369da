//! Explicit registry of model constructors.
//!
//! Populated at startup through [`ModelRegistry::with_builtin`] and
//! [`ModelRegistry::register`]; nothing registers itself.

use std::fmt;

use super::builtin::{Constant, Gaussian, Linear, LogParabola, PowerLaw};
use super::FitModel;
use crate::error::{FitError, Result};

type Constructor = Box<dyn Fn() -> Box<dyn FitModel> + Send + Sync>;

#[derive(Default)]
pub struct ModelRegistry {
    entries: Vec<(String, Constructor)>,
}

impl ModelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in models.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("Constant", || Box::new(Constant));
        registry.register("Linear", || Box::new(Linear));
        registry.register("PowerLaw", || Box::new(PowerLaw));
        registry.register("LogParabola", || Box::new(LogParabola));
        registry.register("Gaussian", || Box::new(Gaussian));
        registry
    }

    /// Register a constructor. An existing entry of the same name is replaced.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn FitModel> + Send + Sync + 'static,
    {
        let constructor: Constructor = Box::new(constructor);
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = constructor,
            None => self.entries.push((name.to_string(), constructor)),
        }
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn FitModel>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ctor)| ctor())
            .ok_or_else(|| FitError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry").field("names", &self.names()).finish()
    }
}

impl fmt::Display for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Model registry ===")?;
        writeln!(f, " Number of models: {}", self.len())?;
        for (name, ctor) in &self.entries {
            let model = ctor();
            let pars: Vec<String> = model.parameters().iter().map(|p| p.name().to_string()).collect();
            writeln!(f, "  {:<12} ({})", name, pars.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pars::ModelPar;

    #[derive(Debug)]
    struct Twice;

    impl FitModel for Twice {
        fn type_name(&self) -> &'static str {
            "Twice"
        }
        fn parameters(&self) -> Vec<ModelPar> {
            vec![ModelPar::new("a", 1.0)]
        }
        fn eval(&self, x: f64, pars: &[ModelPar]) -> f64 {
            2.0 * pars[0].value() * x
        }
    }

    #[test]
    fn test_builtin_names() {
        let r = ModelRegistry::with_builtin();
        assert_eq!(r.names(), vec!["Constant", "Linear", "PowerLaw", "LogParabola", "Gaussian"]);
        assert_eq!(r.create("PowerLaw").unwrap().type_name(), "PowerLaw");
    }

    #[test]
    fn test_unknown_model() {
        let r = ModelRegistry::with_builtin();
        assert!(matches!(r.create("Shell"), Err(FitError::UnknownModel(_))));
    }

    #[test]
    fn test_register_custom() {
        let mut r = ModelRegistry::new();
        assert!(r.is_empty());
        r.register("Twice", || Box::new(Twice));
        r.register("Twice", || Box::new(Twice));
        assert_eq!(r.len(), 1);
        assert!(r.contains("Twice"));
        let m = r.create("Twice").unwrap();
        assert_eq!(m.eval(3.0, &m.parameters()), 6.0);
        assert!(r.to_string().contains("Twice"));
    }
}
