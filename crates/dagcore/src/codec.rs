//! Binary graph format, version 1.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header      version, node count, port count, string pool length, data pool length   (5 x u64)
//! nodes       name offset, type offset, port count, first port index                  (4 x u64 each)
//! ports       name offset, edge port index, data offset (3 x u64), variant, behavior   (2 x u32 each)
//! strings     NUL-terminated UTF-8
//! data        type name offset (u64), byte length (u64), bytes
//! ```
//!
//! Missing edges and values are stored as `u64::MAX`. Edges live on the
//! input side and point at the flat index of the output port.

use crate::graph::Graph;
use crate::node::Node;
use crate::port::{InputBehavior, Port, PortVariant};
use crate::registry::Environment;
use crate::{CodecError, DagError, Data};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub const FORMAT_VERSION: u64 = 1;

const NONE: u64 = u64::MAX;
const HEADER_LEN: usize = 5 * 8;
const NODE_ENTRY_LEN: usize = 4 * 8;
const PORT_ENTRY_LEN: usize = 3 * 8 + 2 * 4;

fn variant_tag(variant: PortVariant) -> u32 {
    match variant {
        PortVariant::Input => 0,
        PortVariant::Output => 1,
        PortVariant::Parameter => 2,
    }
}

fn variant_from_tag(tag: u32) -> Result<PortVariant, CodecError> {
    match tag {
        0 => Ok(PortVariant::Input),
        1 => Ok(PortVariant::Output),
        2 => Ok(PortVariant::Parameter),
        tag => Err(CodecError::InvalidTag {
            what: "port variant",
            tag,
        }),
    }
}

fn behavior_tag(behavior: InputBehavior) -> u32 {
    match behavior {
        InputBehavior::Reference => 0,
        InputBehavior::Clone => 1,
        InputBehavior::Acquire => 2,
    }
}

fn behavior_from_tag(tag: u32) -> Result<InputBehavior, CodecError> {
    match tag {
        0 => Ok(InputBehavior::Reference),
        1 => Ok(InputBehavior::Clone),
        2 => Ok(InputBehavior::Acquire),
        tag => Err(CodecError::InvalidTag {
            what: "input behavior",
            tag,
        }),
    }
}

#[derive(Default)]
struct Writer {
    nodes: Vec<u8>,
    ports: Vec<u8>,
    strings: Vec<u8>,
    data: Vec<u8>,
    node_count: u64,
    port_count: u64,
}

impl Writer {
    fn string(&mut self, value: &str) -> u64 {
        let offset = self.strings.len() as u64;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        offset
    }

    fn value(&mut self, data: &Data) -> Result<u64, CodecError> {
        let bytes = data.serialize()?;
        let type_offset = self.string(data.type_name());
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(&type_offset.to_le_bytes());
        self.data.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.data.extend_from_slice(&bytes);
        Ok(offset)
    }

    fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_LEN + self.nodes.len() + self.ports.len() + self.strings.len() + self.data.len(),
        );
        for field in [
            FORMAT_VERSION,
            self.node_count,
            self.port_count,
            self.strings.len() as u64,
            self.data.len() as u64,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&self.nodes);
        out.extend_from_slice(&self.ports);
        out.extend_from_slice(&self.strings);
        out.extend_from_slice(&self.data);
        out
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CodecError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn len(&mut self, what: &'static str) -> Result<usize, CodecError> {
        let value = self.u64()?;
        usize::try_from(value).map_err(|_| CodecError::InvalidOffset { what, offset: value })
    }
}

fn string_at(pool: &[u8], offset: u64) -> Result<String, CodecError> {
    let invalid = CodecError::InvalidOffset {
        what: "string",
        offset,
    };
    let start = usize::try_from(offset).map_err(|_| invalid)?;
    let tail = pool.get(start..).ok_or(CodecError::InvalidOffset {
        what: "string",
        offset,
    })?;
    let end = tail.iter().position(|b| *b == 0).ok_or(CodecError::InvalidOffset {
        what: "string",
        offset,
    })?;
    String::from_utf8(tail[..end].to_vec()).map_err(|_| CodecError::InvalidUtf8(offset))
}

/// Serialized value: type name and the type serializer's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    pub type_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPort {
    pub name: String,
    pub variant: PortVariant,
    pub behavior: InputBehavior,
    /// Flat index of the linked output
    pub edge: Option<usize>,
    pub value: Option<RawValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNode {
    pub name: String,
    pub type_name: String,
    pub ports: Vec<RawPort>,
}

/// Decoded, not yet instantiated graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGraph {
    pub version: u64,
    pub nodes: Vec<RawNode>,
}

impl RawGraph {
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(bytes);

        let version = reader.u64()?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let node_count = reader.len("node count")?;
        let port_count = reader.len("port count")?;
        let strings_len = reader.len("string pool")?;
        let data_len = reader.len("data pool")?;

        let node_bytes = node_count
            .checked_mul(NODE_ENTRY_LEN)
            .ok_or(CodecError::Truncated(HEADER_LEN))?;
        let port_bytes = port_count
            .checked_mul(PORT_ENTRY_LEN)
            .ok_or(CodecError::Truncated(HEADER_LEN))?;

        let node_table = reader.take(node_bytes)?;
        let port_table = reader.take(port_bytes)?;
        let strings = reader.take(strings_len)?;
        let data = reader.take(data_len)?;

        let mut ports = Vec::with_capacity(port_count);
        let mut entries = Reader::new(port_table);
        for _ in 0..port_count {
            let name = string_at(strings, entries.u64()?)?;
            let edge = entries.u64()?;
            let data_offset = entries.u64()?;
            let variant = variant_from_tag(entries.u32()?)?;
            let behavior = entries.u32()?;

            let behavior = if variant == PortVariant::Input {
                behavior_from_tag(behavior)?
            } else {
                InputBehavior::default()
            };

            let edge = match edge {
                NONE => None,
                index if index < port_count as u64 => Some(index as usize),
                index => {
                    return Err(CodecError::InvalidEdge {
                        from: index,
                        to: ports.len() as u64,
                    })
                }
            };

            let value = match data_offset {
                NONE => None,
                offset => Some(value_at(strings, data, offset)?),
            };

            ports.push(RawPort {
                name,
                variant,
                behavior,
                edge,
                value,
            });
        }

        let mut nodes = Vec::with_capacity(node_count);
        let mut entries = Reader::new(node_table);
        for _ in 0..node_count {
            let name = string_at(strings, entries.u64()?)?;
            let type_name = string_at(strings, entries.u64()?)?;
            let count = entries.u64()?;
            let first = entries.u64()?;

            let range = first
                .checked_add(count)
                .filter(|end| *end <= port_count as u64)
                .map(|end| first as usize..end as usize)
                .ok_or(CodecError::InvalidOffset {
                    what: "port",
                    offset: first,
                })?;

            nodes.push(RawNode {
                name,
                type_name,
                ports: ports[range].to_vec(),
            });
        }

        Ok(Self { version, nodes })
    }
}

fn value_at(strings: &[u8], data: &[u8], offset: u64) -> Result<RawValue, CodecError> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|start| *start <= data.len())
        .ok_or(CodecError::InvalidOffset {
            what: "data",
            offset,
        })?;

    let mut reader = Reader::new(&data[start..]);
    let type_name = string_at(strings, reader.u64()?)?;
    let len = reader.len("data length")?;
    let bytes = reader.take(len)?.to_vec();
    Ok(RawValue { type_name, bytes })
}

impl fmt::Display for RawGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port_count: usize = self.nodes.iter().map(|n| n.ports.len()).sum();
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Nodes: {}", self.nodes.len())?;
        writeln!(f, "Ports: {}", port_count)?;

        let mut index = 0;
        for node in &self.nodes {
            writeln!(f, "Node: {} ({})", node.name, node.type_name)?;
            for port in &node.ports {
                write!(f, "  [{}] {:?} {}", index, port.variant, port.name)?;
                if port.variant == PortVariant::Input {
                    write!(f, " ({:?})", port.behavior)?;
                }
                if let Some(value) = &port.value {
                    write!(f, " = {}", value.type_name)?;
                    if let Ok(text) = std::str::from_utf8(&value.bytes) {
                        write!(f, " {}", text)?;
                    }
                }
                writeln!(f)?;
                if let Some(edge) = port.edge {
                    writeln!(f, "    - Link: port[{}]", edge)?;
                }
                index += 1;
            }
        }
        Ok(())
    }
}

impl Graph {
    /// Encode the graph in the version 1 binary format.
    pub fn serialize(&self) -> Result<Vec<u8>, DagError> {
        let nodes = self.nodes();
        let ports: Vec<Vec<Port>> = nodes.iter().map(Node::ports).collect();

        let flat: HashMap<usize, u64> = ports
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, port)| (port.key(), i as u64))
            .collect();

        let mut writer = Writer::default();
        for (node, node_ports) in nodes.iter().zip(&ports) {
            let name = writer.string(&node.id().to_string());
            let type_name = writer.string(node.type_name());
            let first_port = writer.port_count;

            for field in [name, type_name, node_ports.len() as u64, first_port] {
                writer.nodes.extend_from_slice(&field.to_le_bytes());
            }
            writer.node_count += 1;

            for port in node_ports {
                let name = writer.string(port.name());
                let edge = port
                    .link()
                    .and_then(|output| flat.get(&output.key()).copied())
                    .unwrap_or(NONE);
                let data = match port.peek() {
                    Some(value) => writer.value(&value)?,
                    None => NONE,
                };

                for field in [name, edge, data] {
                    writer.ports.extend_from_slice(&field.to_le_bytes());
                }
                writer
                    .ports
                    .extend_from_slice(&variant_tag(port.variant()).to_le_bytes());
                writer
                    .ports
                    .extend_from_slice(&behavior_tag(port.behavior().unwrap_or_default()).to_le_bytes());
                writer.port_count += 1;
            }
        }

        Ok(writer.finish())
    }

    /// Rebuild a graph from its binary form.
    ///
    /// Nodes and ports are restored as stored, edges reconnected and values
    /// decoded through their registered type before every node runs its
    /// declaration pass.
    pub fn deserialize(env: &Arc<Environment>, bytes: &[u8]) -> Result<Graph, DagError> {
        let raw = RawGraph::parse(bytes)?;
        Self::from_raw(env, &raw)
    }

    pub fn from_raw(env: &Arc<Environment>, raw: &RawGraph) -> Result<Graph, DagError> {
        let graph = Graph::new(env.clone());
        let mut flat: Vec<(Port, Option<usize>)> = Vec::new();

        for raw_node in &raw.nodes {
            let id = Uuid::parse_str(&raw_node.name).unwrap_or_else(|_| {
                tracing::debug!("Node name '{}' is not an id, assigning a new one", raw_node.name);
                Uuid::new_v4()
            });
            let node = graph.push_undeclared(id, &raw_node.type_name)?;

            for raw_port in &raw_node.ports {
                let value = match &raw_port.value {
                    Some(raw_value) => Some(decode_value(env, raw_value)?),
                    None => None,
                };
                let port = Port::new(
                    node.downgrade(),
                    &raw_port.name,
                    raw_port.variant,
                    raw_port.behavior,
                    value,
                );
                node.push_port(port.clone());
                flat.push((port, raw_port.edge));
            }
        }

        for (target, source) in flat.iter().enumerate() {
            let (input, Some(edge)) = source else {
                continue;
            };
            let invalid = CodecError::InvalidEdge {
                from: *edge as u64,
                to: target as u64,
            };
            let Some((output, _)) = flat.get(*edge) else {
                return Err(invalid.into());
            };
            if input.variant() != PortVariant::Input || output.variant() != PortVariant::Output {
                return Err(invalid.into());
            }
            output.link_input(input);
        }

        for node in graph.nodes() {
            node.declare()?;
        }

        tracing::debug!(graph = %graph.id(), "Deserialized {} nodes", graph.len());
        Ok(graph)
    }

    /// True if both graphs have the same node types, ports, links and
    /// values. Node ids are not compared.
    pub fn same_structure(&self, other: &Graph) -> bool {
        let (a, b) = (self.nodes(), other.nodes());
        if a.len() != b.len() {
            return false;
        }

        let index = |nodes: &[Node]| -> HashMap<usize, usize> {
            nodes
                .iter()
                .flat_map(Node::ports)
                .enumerate()
                .map(|(i, port)| (port.key(), i))
                .collect()
        };
        let (index_a, index_b) = (index(&a), index(&b));

        a.iter().zip(&b).all(|(left, right)| {
            let (lp, rp) = (left.ports(), right.ports());
            left.type_name() == right.type_name()
                && lp.len() == rp.len()
                && lp.iter().zip(&rp).all(|(l, r)| {
                    let edge_l = l.link().and_then(|p| index_a.get(&p.key()).copied());
                    let edge_r = r.link().and_then(|p| index_b.get(&p.key()).copied());
                    let values = match (l.peek(), r.peek()) {
                        (Some(x), Some(y)) => x.equals(&y),
                        (None, None) => true,
                        _ => false,
                    };
                    l.name() == r.name()
                        && l.variant() == r.variant()
                        && l.behavior() == r.behavior()
                        && edge_l == edge_r
                        && values
                })
        })
    }
}

fn decode_value(env: &Arc<Environment>, raw: &RawValue) -> Result<Data, DagError> {
    let ty = env.registry().data_type(&raw.type_name)?;
    let value = ty.ops().deserialize(env, &raw.bytes)?;
    Ok(Data::from_parts(ty, value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0] = 2;
        assert!(matches!(
            RawGraph::parse(&bytes),
            Err(CodecError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_rejects_truncated_input() {
        assert!(matches!(RawGraph::parse(&[1, 0, 0]), Err(CodecError::Truncated(0))));

        // Header announces one node but no node table follows.
        let mut bytes = Vec::new();
        for field in [1u64, 1, 0, 0, 0] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        assert!(matches!(RawGraph::parse(&bytes), Err(CodecError::Truncated(_))));
    }

    #[test]
    fn test_empty_graph_parses() {
        let writer = Writer::default();
        let raw = RawGraph::parse(&writer.finish()).unwrap();
        assert_eq!(raw.version, FORMAT_VERSION);
        assert!(raw.nodes.is_empty());
    }

    #[test]
    fn test_string_offsets_checked() {
        let pool = b"abc\0";
        assert_eq!(string_at(pool, 0).unwrap(), "abc");
        assert_eq!(string_at(pool, 3).unwrap(), "");
        assert!(string_at(pool, 9).is_err());
        assert!(string_at(b"abc", 0).is_err());
    }
}
