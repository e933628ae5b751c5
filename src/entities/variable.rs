use crate::persistence::{impl_entity, EntityKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag derived from a variable's JSON value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Null,
    Boolean,
    Integer,
    Double,
    String,
    Json,
}

impl VariableType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => VariableType::Null,
            Value::Bool(_) => VariableType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => VariableType::Integer,
            Value::Number(_) => VariableType::Double,
            Value::String(_) => VariableType::String,
            Value::Array(_) | Value::Object(_) => VariableType::Json,
        }
    }
}

/// A runtime variable local to an execution or a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInstanceEntity {
    pub id: String,
    pub revision: i64,
    pub name: String,
    pub value: Value,
    pub value_type: VariableType,
    pub execution_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub task_id: Option<String>,
}

impl_entity!(VariableInstanceEntity, EntityKind::Variable);

impl VariableInstanceEntity {
    pub fn set_value(&mut self, value: Value) {
        self.value_type = VariableType::of(&value);
        self.value = value;
    }
}
