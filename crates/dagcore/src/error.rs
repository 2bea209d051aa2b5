use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),
}

impl DagError {
    /// Coarse classification shared by every public operation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DagError::Graph(e) => e.kind(),
            DagError::Port(e) => e.kind(),
            DagError::Registry(e) => e.kind(),
            DagError::Codec(_) => ErrorKind::Parse,
            DagError::Node(_) => ErrorKind::Unknown,
        }
    }
}

/// Error classes every failure maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required argument was empty or otherwise unusable.
    InvalidParameter,
    Parse,
    Allocation,
    ObjectLocked,
    IncorrectPortVariant,
    MissingDependency,
    Unknown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Graph is locked")]
    Locked,

    #[error("At least one node must be defined to execute a graph")]
    Empty,

    #[error("Node {0} is not part of the graph")]
    NodeNotFound(String),

    #[error("Graph no longer exists")]
    Detached,
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Locked => ErrorKind::ObjectLocked,
            GraphError::Empty | GraphError::NodeNotFound(_) | GraphError::Detached => {
                ErrorKind::Unknown
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("Port '{0}' cannot be modified while its graph is locked")]
    Locked(String),

    #[error("Output port '{0}' can only be written while its graph executes")]
    OutputOutsideExecution(String),

    #[error("Node of port '{0}' is being declared")]
    Declaring(String),

    #[error("Incorrect port variant: {0}")]
    IncorrectVariant(String),

    #[error("Port not found: {0}")]
    NotFound(String),

    #[error("Port name must not be empty")]
    EmptyName,

    #[error("Port '{0}' no longer belongs to a node")]
    Detached(String),
}

impl PortError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortError::Locked(_)
            | PortError::OutputOutsideExecution(_)
            | PortError::Declaring(_) => ErrorKind::ObjectLocked,
            PortError::IncorrectVariant(_) => ErrorKind::IncorrectPortVariant,
            PortError::EmptyName => ErrorKind::InvalidParameter,
            PortError::NotFound(_) | PortError::Detached(_) => ErrorKind::Unknown,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    #[error("Type name must not be empty")]
    EmptyName,

    #[error("Value is not a '{0}'")]
    TypeMismatch(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::EmptyName | RegistryError::TypeMismatch(_) => {
                ErrorKind::InvalidParameter
            }
            RegistryError::UnknownNodeType(_) | RegistryError::UnknownDataType(_) => {
                ErrorKind::Unknown
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported graph version {0}")]
    UnsupportedVersion(u64),

    #[error("Unexpected end of input at byte {0}")]
    Truncated(usize),

    #[error("Invalid {what} offset {offset}")]
    InvalidOffset { what: &'static str, offset: u64 },

    #[error("Invalid edge from port {from} to port {to}")]
    InvalidEdge { from: u64, to: u64 },

    #[error("Invalid enum tag {tag} for {what}")]
    InvalidTag { what: &'static str, tag: u32 },

    #[error("String at offset {0} is not valid UTF-8")]
    InvalidUtf8(u64),

    #[error("Value of type '{type_name}' failed to encode or decode: {message}")]
    Value { type_name: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Graph reconstruction failed: {0}")]
    Rebuild(String),
}

/// Errors raised from inside node task functions.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl From<DagError> for NodeError {
    fn from(e: DagError) -> Self {
        NodeError::ExecutionFailed(e.to_string())
    }
}

impl From<PortError> for NodeError {
    fn from(e: PortError) -> Self {
        NodeError::ExecutionFailed(e.to_string())
    }
}
