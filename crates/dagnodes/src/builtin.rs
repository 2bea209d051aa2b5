use dagcore::{DagError, InputBehavior, Node, NodeError, Registry, SerdeType, Task};
use dagruntime::Plugin;
use parking_lot::Mutex;
use std::sync::Arc;

pub const INT_TYPE: &str = "int";
pub const FLOAT_TYPE: &str = "float";
pub const DOUBLE_TYPE: &str = "double";
pub const BOOL_TYPE: &str = "bool";
pub const STRING_TYPE: &str = "string";
pub const BYTES_TYPE: &str = "bytes";
pub const JSON_TYPE: &str = "json";

/// Scalar, string and byte types plus the input, math and output nodes
pub struct CorePlugin;

impl Plugin for CorePlugin {
    fn id(&self) -> &str {
        "core"
    }

    fn init(&self, registry: &mut Registry) -> Result<(), DagError> {
        registry.register_type(SerdeType::<i32>::new(INT_TYPE))?;
        registry.register_type(SerdeType::<f32>::new(FLOAT_TYPE))?;
        registry.register_type(SerdeType::<f64>::new(DOUBLE_TYPE))?;
        registry.register_type(SerdeType::<bool>::new(BOOL_TYPE))?;
        registry.register_type(SerdeType::<String>::new(STRING_TYPE))?;
        registry.register_type(SerdeType::<Vec<u8>>::new(BYTES_TYPE))?;
        registry.register_type(SerdeType::<serde_json::Value>::new(JSON_TYPE))?;

        registry.register_node("input", |decl| {
            let value = decl.value(INT_TYPE, 1i32)?;
            decl.parameter("value", Some(value))?;
            decl.output("result")?;
            decl.task(input_task);
            Ok(())
        })?;

        registry.register_node("math", |decl| {
            let first = decl.value(INT_TYPE, 5i32)?;
            let second = decl.value(INT_TYPE, 2i32)?;
            let operation = decl.value(INT_TYPE, Operation::Add.code())?;
            decl.input("first", InputBehavior::Reference, Some(first))?;
            decl.input("second", InputBehavior::Reference, Some(second))?;
            decl.parameter("operation", Some(operation))?;
            decl.output("result")?;
            decl.task(math_task);
            Ok(())
        })?;

        registry.register_node("output", |decl| {
            let value = decl.value(INT_TYPE, 1i32)?;
            let message = decl.value(STRING_TYPE, "Output: ".to_string())?;
            decl.input("value", InputBehavior::Reference, Some(value))?;
            decl.input("message", InputBehavior::Reference, Some(message))?;
            decl.task(output_task);
            Ok(())
        })?;

        Ok(())
    }
}

fn input_task(_: &Task, node: &Node) -> Result<(), NodeError> {
    let result = node.port_required("result")?;
    match node.get("value")? {
        Some(value) => result.set_value(value.duplicate().map_err(DagError::from)?)?,
        None => result.clear()?,
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    pub fn code(self) -> i32 {
        match self {
            Operation::Add => 0,
            Operation::Subtract => 1,
            Operation::Multiply => 2,
            Operation::Divide => 3,
        }
    }

    /// Unknown codes fall back to addition.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Operation::Subtract,
            2 => Operation::Multiply,
            3 => Operation::Divide,
            _ => Operation::Add,
        }
    }

    pub fn apply(self, first: i32, second: i32) -> Result<i32, NodeError> {
        match self {
            Operation::Add => Ok(first.wrapping_add(second)),
            Operation::Subtract => Ok(first.wrapping_sub(second)),
            Operation::Multiply => Ok(first.wrapping_mul(second)),
            Operation::Divide => first
                .checked_div(second)
                .ok_or_else(|| NodeError::ExecutionFailed(format!("cannot divide {} by {}", first, second))),
        }
    }
}

#[derive(Clone, Copy)]
struct MathInputs {
    first: i32,
    second: i32,
    operation: Operation,
}

// Each stage only fills its slot when the previous one succeeded.
#[derive(Default)]
struct MathState {
    inputs: Option<MathInputs>,
    result: Option<i32>,
}

fn read_int(node: &Node, name: &str) -> Result<i32, NodeError> {
    let data = node
        .get(name)?
        .ok_or_else(|| NodeError::MissingInput(name.to_string()))?;
    data.get::<i32>().copied().ok_or_else(|| NodeError::InvalidInputType {
        field: name.to_string(),
        expected: INT_TYPE.to_string(),
        actual: data.type_name().to_string(),
    })
}

/// Splits into read, calculate and write subtasks sharing one state.
fn math_task(task: &Task, node: &Node) -> Result<(), NodeError> {
    let state = Arc::new(Mutex::new(MathState::default()));

    let read = {
        let (node, state) = (node.clone(), state.clone());
        Task::new("math_read", move |_| {
            let inputs = MathInputs {
                first: read_int(&node, "first")?,
                second: read_int(&node, "second")?,
                operation: Operation::from_code(read_int(&node, "operation")?),
            };
            state.lock().inputs = Some(inputs);
            Ok(())
        })
    };

    let calculate = {
        let state = state.clone();
        Task::new("math_calculate", move |_| {
            let Some(inputs) = state.lock().inputs else {
                tracing::debug!("Skipping calculation, inputs were not read");
                return Ok(());
            };
            let result = inputs.operation.apply(inputs.first, inputs.second)?;
            state.lock().result = Some(result);
            Ok(())
        })
    };

    let write = {
        let node = node.clone();
        Task::new("math_write", move |_| {
            let result = state.lock().result;
            let port = node.port_required("result")?;
            match result {
                Some(result) => {
                    port.set(INT_TYPE, result)?;
                    node.events().data("result", INT_TYPE);
                }
                // A failed read or calculation leaves the output empty.
                None => port.clear()?,
            }
            Ok(())
        })
    };

    calculate.depend_on(&read);
    write.depend_on(&calculate);
    task.add_subgraph(&[read, calculate, write]);
    Ok(())
}

fn output_task(_: &Task, node: &Node) -> Result<(), NodeError> {
    let message = node
        .get("message")?
        .and_then(|data| data.get::<String>().cloned())
        .unwrap_or_default();
    let value = read_int(node, "value")?;

    let text = format!("{}{}", message, value);
    println!("{}", text);
    tracing::info!(node = %node.id(), "{}", text);
    node.events().info(text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations() {
        assert_eq!(Operation::from_code(2).apply(2, 3).unwrap(), 6);
        assert_eq!(Operation::from_code(1).apply(2, 3).unwrap(), -1);
        assert_eq!(Operation::from_code(3).apply(7, 2).unwrap(), 3);
        assert_eq!(Operation::from_code(42), Operation::Add);
        assert!(Operation::Divide.apply(1, 0).is_err());
        assert_eq!(Operation::Add.apply(i32::MAX, 1).unwrap(), i32::MIN);
    }
}
