//! View definitions and execution options.

use serde::{Deserialize, Serialize};

use crate::domain::value::{ComputationTarget, ValueRequirement, ValueSpecification};

/// Function id of the root item that copies live data into the cache.
pub const LIVE_DATA_SOURCING_FUNCTION: &str = "live-data-sourcing";

/// A named set of calculations that clients attach to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: String,
    #[serde(default, rename = "calc_config")]
    pub calc_configs: Vec<ViewCalculationConfiguration>,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calc_configs: Vec::new(),
        }
    }

    pub fn with_calc_config(mut self, config: ViewCalculationConfiguration) -> Self {
        self.calc_configs.push(config);
        self
    }
}

/// One calculation configuration of a view.
///
/// `live_data` lists the requirements sourced from market data each cycle;
/// `derived` lists values computed from them by functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewCalculationConfiguration {
    pub name: String,
    #[serde(default)]
    pub live_data: Vec<ValueRequirement>,
    #[serde(default)]
    pub derived: Vec<DerivedValue>,
}

impl ViewCalculationConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            live_data: Vec::new(),
            derived: Vec::new(),
        }
    }

    pub fn add_live_data(mut self, requirement: ValueRequirement) -> Self {
        self.live_data.push(requirement);
        self
    }

    pub fn add_derived(mut self, derived: DerivedValue) -> Self {
        self.derived.push(derived);
        self
    }

    /// Specification a live data requirement resolves to.
    pub fn live_data_specification(requirement: &ValueRequirement) -> ValueSpecification {
        ValueSpecification::new(
            requirement.value_name.clone(),
            requirement.target.clone(),
            LIVE_DATA_SOURCING_FUNCTION,
        )
    }
}

/// A value computed by `function_id` on `target` from `inputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedValue {
    pub function_id: String,
    pub value_name: String,
    pub target: ComputationTarget,
    #[serde(default)]
    pub inputs: Vec<ValueRequirement>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Whether the value appears in view results. Values that are only
    /// inputs to other derived values can be hidden.
    #[serde(default = "default_output")]
    pub output: bool,
}

fn default_output() -> bool {
    true
}

impl DerivedValue {
    pub fn new(
        function_id: impl Into<String>,
        value_name: impl Into<String>,
        target: ComputationTarget,
        inputs: Vec<ValueRequirement>,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            value_name: value_name.into(),
            target,
            inputs,
            parameters: serde_json::Value::Null,
            output: true,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.output = false;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn requirement(&self) -> ValueRequirement {
        ValueRequirement::new(self.value_name.clone(), self.target.clone())
    }

    pub fn specification(&self) -> ValueSpecification {
        ValueSpecification::new(self.value_name.clone(), self.target.clone(), self.function_id.clone())
    }
}

/// How a view process decides to run cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run a cycle whenever live data changes.
    #[default]
    RealTime,
    /// Run the initial cycle, then only on explicit trigger.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub mode: ExecutionMode,
}

impl ExecutionOptions {
    pub fn real_time() -> Self {
        Self {
            mode: ExecutionMode::RealTime,
        }
    }

    pub fn manual() -> Self {
        Self {
            mode: ExecutionMode::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_definition_loads_from_json() {
        let json = serde_json::json!({
            "name": "Equities",
            "calc_config": [{
                "name": "Default",
                "live_data": [
                    {"value_name": "Market_Value", "target": {"kind": "primitive", "id": "AAPL"}}
                ],
                "derived": [{
                    "function_id": "scale",
                    "value_name": "Doubled",
                    "target": {"kind": "primitive", "id": "AAPL"},
                    "inputs": [
                        {"value_name": "Market_Value", "target": {"kind": "primitive", "id": "AAPL"}}
                    ],
                    "parameters": {"factor": 2}
                }]
            }]
        });

        let def: ViewDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.calc_configs.len(), 1);
        let derived = &def.calc_configs[0].derived[0];
        assert!(derived.output);
        assert_eq!(derived.inputs.len(), 1);
        assert_eq!(derived.specification().function_id, "scale");
    }

    #[test]
    fn default_execution_is_real_time() {
        assert_eq!(ExecutionOptions::default(), ExecutionOptions::real_time());
    }
}
