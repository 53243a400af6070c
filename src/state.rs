use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key the orchestrator writes the raw user input under before any stage runs.
pub const USER_INPUT_KEY: &str = "user_input";

/// Shared state threaded through one pipeline run.
///
/// Keys keep their insertion order so that state dumps read in stage order.
/// The escalation flag is not part of the serialized form; it is a signal
/// from a stage to the enclosing loop controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(flatten)]
    values: Map<String, Value>,
    #[serde(skip)]
    escalate: bool,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.values.get_mut(key)
    }

    /// Convenience accessor for string-valued keys.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Ask the enclosing loop to stop after the current pass.
    pub fn escalate(&mut self) {
        self.escalate = true;
    }

    pub fn is_escalated(&self) -> bool {
        self.escalate
    }

    /// Read and clear the escalation flag.
    pub fn take_escalation(&mut self) -> bool {
        std::mem::take(&mut self.escalate)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

impl From<Map<String, Value>> for State {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values,
            escalate: false,
        }
    }
}

impl FromIterator<(String, Value)> for State {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Map<String, Value>>())
    }
}
