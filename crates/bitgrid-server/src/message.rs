//! Cluster messages and their wire encoding.
//!
//! # Wire format
//!
//! All integers are little-endian. Strings and lists carry a u32 length
//! prefix.
//!
//! ```text
//! [tag: 1B][payload]
//! ```
//!
//! Payload layouts follow the field order of each variant. Decoding
//! rejects unknown tags, short buffers and trailing bytes.

use std::net::SocketAddr;

use bitgrid_cluster::{
    ClusterState, FragmentSource, JobId, Node, NodeId, ResizeInstruction,
};
use bitgrid_core::{
    CacheType, FieldInfo, FieldKind, FieldOptions, IndexInfo, IndexOptions, TimeQuantum,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ApiError;

const TAG_CREATE_INDEX: u8 = 1;
const TAG_DELETE_INDEX: u8 = 2;
const TAG_CREATE_FIELD: u8 = 3;
const TAG_DELETE_FIELD: u8 = 4;
const TAG_DELETE_VIEW: u8 = 5;
const TAG_SET_COORDINATOR: u8 = 6;
const TAG_RECALCULATE_CACHES: u8 = 7;
const TAG_CREATE_SLICE: u8 = 8;
const TAG_NODE_JOIN: u8 = 9;
const TAG_NODE_LEAVE: u8 = 10;
const TAG_RESIZE_INSTRUCTION: u8 = 11;
const TAG_RESIZE_INSTRUCTION_COMPLETE: u8 = 12;
const TAG_CLUSTER_STATUS: u8 = 13;

const CONTEXT: &str = "decoding cluster message";

/// A message exchanged between nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    CreateIndex {
        index: String,
        options: IndexOptions,
    },
    DeleteIndex {
        index: String,
    },
    CreateField {
        index: String,
        field: String,
        options: FieldOptions,
    },
    DeleteField {
        index: String,
        field: String,
    },
    DeleteView {
        index: String,
        field: String,
        view: String,
    },
    SetCoordinator {
        node: Node,
    },
    RecalculateCaches,
    /// A node created `slice` of `index`.
    CreateSlice {
        index: String,
        slice: u64,
    },
    NodeJoin {
        node: Node,
    },
    NodeLeave {
        node: NodeId,
    },
    /// Work for one node of a resize job, with the schema it needs.
    ResizeInstruction {
        instruction: ResizeInstruction,
        schema: Vec<IndexInfo>,
    },
    ResizeInstructionComplete {
        job: JobId,
        node: NodeId,
        error: Option<String>,
    },
    ClusterStatus {
        state: ClusterState,
        nodes: Vec<Node>,
    },
}

impl Message {
    /// Name used in logs and replication errors.
    pub fn name(&self) -> &'static str {
        match self {
            Message::CreateIndex { .. } => "CreateIndex",
            Message::DeleteIndex { .. } => "DeleteIndex",
            Message::CreateField { .. } => "CreateField",
            Message::DeleteField { .. } => "DeleteField",
            Message::DeleteView { .. } => "DeleteView",
            Message::SetCoordinator { .. } => "SetCoordinator",
            Message::RecalculateCaches => "RecalculateCaches",
            Message::CreateSlice { .. } => "CreateSlice",
            Message::NodeJoin { .. } => "NodeJoin",
            Message::NodeLeave { .. } => "NodeLeave",
            Message::ResizeInstruction { .. } => "ResizeInstruction",
            Message::ResizeInstructionComplete { .. } => "ResizeInstructionComplete",
            Message::ClusterStatus { .. } => "ClusterStatus",
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            Message::CreateIndex { index, options } => {
                buf.put_u8(TAG_CREATE_INDEX);
                put_str(&mut buf, index);
                buf.put_u8(options.keys as u8);
            }
            Message::DeleteIndex { index } => {
                buf.put_u8(TAG_DELETE_INDEX);
                put_str(&mut buf, index);
            }
            Message::CreateField {
                index,
                field,
                options,
            } => {
                buf.put_u8(TAG_CREATE_FIELD);
                put_str(&mut buf, index);
                put_str(&mut buf, field);
                put_field_options(&mut buf, options);
            }
            Message::DeleteField { index, field } => {
                buf.put_u8(TAG_DELETE_FIELD);
                put_str(&mut buf, index);
                put_str(&mut buf, field);
            }
            Message::DeleteView { index, field, view } => {
                buf.put_u8(TAG_DELETE_VIEW);
                put_str(&mut buf, index);
                put_str(&mut buf, field);
                put_str(&mut buf, view);
            }
            Message::SetCoordinator { node } => {
                buf.put_u8(TAG_SET_COORDINATOR);
                put_node(&mut buf, node);
            }
            Message::RecalculateCaches => buf.put_u8(TAG_RECALCULATE_CACHES),
            Message::CreateSlice { index, slice } => {
                buf.put_u8(TAG_CREATE_SLICE);
                put_str(&mut buf, index);
                buf.put_u64_le(*slice);
            }
            Message::NodeJoin { node } => {
                buf.put_u8(TAG_NODE_JOIN);
                put_node(&mut buf, node);
            }
            Message::NodeLeave { node } => {
                buf.put_u8(TAG_NODE_LEAVE);
                put_str(&mut buf, node.as_str());
            }
            Message::ResizeInstruction {
                instruction,
                schema,
            } => {
                buf.put_u8(TAG_RESIZE_INSTRUCTION);
                buf.put_u64_le(instruction.job.0);
                put_node(&mut buf, &instruction.node);
                put_node(&mut buf, &instruction.coordinator);
                buf.put_u32_le(instruction.sources.len() as u32);
                for source in &instruction.sources {
                    put_str(&mut buf, &source.index);
                    buf.put_u64_le(source.slice);
                    put_node(&mut buf, &source.from);
                }
                put_schema(&mut buf, schema);
            }
            Message::ResizeInstructionComplete { job, node, error } => {
                buf.put_u8(TAG_RESIZE_INSTRUCTION_COMPLETE);
                buf.put_u64_le(job.0);
                put_str(&mut buf, node.as_str());
                match error {
                    Some(e) => {
                        buf.put_u8(1);
                        put_str(&mut buf, e);
                    }
                    None => buf.put_u8(0),
                }
            }
            Message::ClusterStatus { state, nodes } => {
                buf.put_u8(TAG_CLUSTER_STATUS);
                buf.put_u8(state_tag(*state));
                buf.put_u32_le(nodes.len() as u32);
                for node in nodes {
                    put_node(&mut buf, node);
                }
            }
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ApiError> {
        let mut r = Reader { buf: data };
        let msg = match r.u8()? {
            TAG_CREATE_INDEX => Message::CreateIndex {
                index: r.string()?,
                options: IndexOptions { keys: r.bool()? },
            },
            TAG_DELETE_INDEX => Message::DeleteIndex { index: r.string()? },
            TAG_CREATE_FIELD => Message::CreateField {
                index: r.string()?,
                field: r.string()?,
                options: r.field_options()?,
            },
            TAG_DELETE_FIELD => Message::DeleteField {
                index: r.string()?,
                field: r.string()?,
            },
            TAG_DELETE_VIEW => Message::DeleteView {
                index: r.string()?,
                field: r.string()?,
                view: r.string()?,
            },
            TAG_SET_COORDINATOR => Message::SetCoordinator { node: r.node()? },
            TAG_RECALCULATE_CACHES => Message::RecalculateCaches,
            TAG_CREATE_SLICE => Message::CreateSlice {
                index: r.string()?,
                slice: r.u64()?,
            },
            TAG_NODE_JOIN => Message::NodeJoin { node: r.node()? },
            TAG_NODE_LEAVE => Message::NodeLeave {
                node: NodeId::new(r.string()?),
            },
            TAG_RESIZE_INSTRUCTION => {
                let job = JobId(r.u64()?);
                let node = r.node()?;
                let coordinator = r.node()?;
                let count = r.len()?;
                let mut sources = Vec::with_capacity(count.min(r.buf.len()));
                for _ in 0..count {
                    sources.push(FragmentSource {
                        index: r.string()?,
                        slice: r.u64()?,
                        from: r.node()?,
                    });
                }
                Message::ResizeInstruction {
                    instruction: ResizeInstruction {
                        job,
                        node,
                        coordinator,
                        sources,
                    },
                    schema: r.schema()?,
                }
            }
            TAG_RESIZE_INSTRUCTION_COMPLETE => Message::ResizeInstructionComplete {
                job: JobId(r.u64()?),
                node: NodeId::new(r.string()?),
                error: if r.bool()? { Some(r.string()?) } else { None },
            },
            TAG_CLUSTER_STATUS => {
                let state = r.state()?;
                let count = r.len()?;
                let mut nodes = Vec::with_capacity(count.min(r.buf.len()));
                for _ in 0..count {
                    nodes.push(r.node()?);
                }
                Message::ClusterStatus { state, nodes }
            }
            tag => return Err(malformed(format!("unknown message tag {tag}"))),
        };
        if !r.buf.is_empty() {
            return Err(malformed(format!("{} trailing bytes", r.buf.len())));
        }
        Ok(msg)
    }
}

fn malformed(reason: String) -> ApiError {
    ApiError::Serialization {
        context: CONTEXT,
        reason,
    }
}

fn state_tag(state: ClusterState) -> u8 {
    match state {
        ClusterState::Starting => 0,
        ClusterState::Normal => 1,
        ClusterState::Resizing => 2,
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_node(buf: &mut BytesMut, node: &Node) {
    put_str(buf, node.id.as_str());
    put_str(buf, &node.addr.to_string());
    buf.put_u8(node.is_coordinator as u8);
}

fn put_field_options(buf: &mut BytesMut, options: &FieldOptions) {
    match &options.kind {
        FieldKind::Set => buf.put_u8(0),
        FieldKind::Int { min, max } => {
            buf.put_u8(1);
            buf.put_i64_le(*min);
            buf.put_i64_le(*max);
        }
        FieldKind::Time { quantum } => {
            buf.put_u8(2);
            put_str(buf, quantum.as_str());
        }
    }
    buf.put_u8(match options.cache_type {
        CacheType::Ranked => 0,
        CacheType::Lru => 1,
        CacheType::None => 2,
    });
    buf.put_u32_le(options.cache_size);
}

fn put_schema(buf: &mut BytesMut, schema: &[IndexInfo]) {
    buf.put_u32_le(schema.len() as u32);
    for index in schema {
        put_str(buf, &index.name);
        buf.put_u8(index.options.keys as u8);
        buf.put_u32_le(index.fields.len() as u32);
        for field in &index.fields {
            put_str(buf, &field.name);
            put_field_options(buf, &field.options);
            buf.put_u32_le(field.views.len() as u32);
            for view in &field.views {
                put_str(buf, view);
            }
        }
    }
}

/// Bounds-checked cursor over an encoded message.
struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, n: usize) -> Result<(), ApiError> {
        if self.buf.remaining() < n {
            return Err(malformed(format!(
                "unexpected end of message: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, ApiError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn bool(&mut self) -> Result<bool, ApiError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(malformed(format!("invalid bool byte {b}"))),
        }
    }

    fn u32(&mut self) -> Result<u32, ApiError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64, ApiError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn i64(&mut self) -> Result<i64, ApiError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    fn len(&mut self) -> Result<usize, ApiError> {
        Ok(self.u32()? as usize)
    }

    fn string(&mut self) -> Result<String, ApiError> {
        let len = self.len()?;
        self.need(len)?;
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        String::from_utf8(head.to_vec()).map_err(|e| malformed(format!("invalid utf-8: {e}")))
    }

    fn node(&mut self) -> Result<Node, ApiError> {
        let id = self.string()?;
        let addr_str = self.string()?;
        let addr: SocketAddr = addr_str
            .parse()
            .map_err(|e| malformed(format!("invalid address {addr_str:?}: {e}")))?;
        let mut node = Node::new(id, addr);
        node.is_coordinator = self.bool()?;
        Ok(node)
    }

    fn state(&mut self) -> Result<ClusterState, ApiError> {
        match self.u8()? {
            0 => Ok(ClusterState::Starting),
            1 => Ok(ClusterState::Normal),
            2 => Ok(ClusterState::Resizing),
            t => Err(malformed(format!("invalid cluster state {t}"))),
        }
    }

    fn field_options(&mut self) -> Result<FieldOptions, ApiError> {
        let kind = match self.u8()? {
            0 => FieldKind::Set,
            1 => FieldKind::Int {
                min: self.i64()?,
                max: self.i64()?,
            },
            2 => {
                let quantum = self.string()?;
                FieldKind::Time {
                    quantum: quantum
                        .parse::<TimeQuantum>()
                        .map_err(|e| malformed(e.to_string()))?,
                }
            }
            t => return Err(malformed(format!("invalid field kind {t}"))),
        };
        let cache_type = match self.u8()? {
            0 => CacheType::Ranked,
            1 => CacheType::Lru,
            2 => CacheType::None,
            t => return Err(malformed(format!("invalid cache type {t}"))),
        };
        Ok(FieldOptions {
            kind,
            cache_type,
            cache_size: self.u32()?,
        })
    }

    fn schema(&mut self) -> Result<Vec<IndexInfo>, ApiError> {
        let count = self.len()?;
        let mut schema = Vec::with_capacity(count.min(self.buf.len()));
        for _ in 0..count {
            let name = self.string()?;
            let options = IndexOptions { keys: self.bool()? };
            let field_count = self.len()?;
            let mut fields = Vec::with_capacity(field_count.min(self.buf.len()));
            for _ in 0..field_count {
                let name = self.string()?;
                let options = self.field_options()?;
                let view_count = self.len()?;
                let mut views = Vec::with_capacity(view_count.min(self.buf.len()));
                for _ in 0..view_count {
                    views.push(self.string()?);
                }
                fields.push(FieldInfo {
                    name,
                    options,
                    views,
                });
            }
            schema.push(IndexInfo {
                name,
                options,
                fields,
            });
        }
        Ok(schema)
    }
}
