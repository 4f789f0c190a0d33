//! Default function set for FHIRPath

use super::FunctionRegistry;
use crate::core::Result;

impl FunctionRegistry {
    pub fn register_default_functions(&self) -> Result<()> {
        self.register_existence_functions()?;
        self.register_subsetting_functions()?;
        self.register_combining_functions()?;
        self.register_conversion_functions()?;
        self.register_string_functions()?;
        self.register_math_functions()?;
        self.register_datetime_functions()?;
        self.register_navigation_functions()?;
        self.register_type_functions()?;
        self.register_aggregate_functions()?;

        // FHIR-specific and network-backed functions
        self.register_fhir_functions()?;
        self.register_terminology_functions()?;

        Ok(())
    }
}

/// Registry holding every built-in function
pub fn create_standard_registry() -> FunctionRegistry {
    let registry = FunctionRegistry::new();
    if let Err(e) = registry.register_default_functions() {
        log::error!("Failed to register default functions: {e}");
    }
    registry
}
