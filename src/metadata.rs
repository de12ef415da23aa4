// Copyright 2020 Joyent, Inc.

//! The in-memory schema model shared by every encoder.
//!
//! A [`Schema`] is an arena of [`Message`]s addressed by [`MessageId`]. Field
//! references to embedded message types are ids into the same arena, which
//! keeps recursive message types representable without reference cycles.
//!
//! Once a schema has been built it is never mutated. Every message carries
//! two baked lookup structures: a tag index used when decoding wire data and
//! a name index used when decoding JSON object keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::error::TranscodeError;
use crate::wire::WireType;

/// Field kinds. Each kind maps to exactly one wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Int32,
    Uint32,
    Int64,
    Uint64,
    Bool,
    Float,
    Double,
    Fixed32,
    Fixed64,
    Enum,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
    String,
    Bytes,
    Message,
    Map,
}

impl TypeKind {
    pub fn wire_type(self) -> WireType {
        match self {
            TypeKind::Int32
            | TypeKind::Uint32
            | TypeKind::Int64
            | TypeKind::Uint64
            | TypeKind::Bool
            | TypeKind::Enum
            | TypeKind::Sint32
            | TypeKind::Sint64 => WireType::Varint,
            TypeKind::Fixed64 | TypeKind::Sfixed64 | TypeKind::Double => {
                WireType::Fixed64
            }
            TypeKind::Fixed32 | TypeKind::Sfixed32 | TypeKind::Float => {
                WireType::Fixed32
            }
            TypeKind::String
            | TypeKind::Bytes
            | TypeKind::Message
            | TypeKind::Map => WireType::LengthDelimited,
        }
    }

    /// Numeric and boolean kinds: the kinds that use packed encoding when
    /// repeated.
    pub fn is_scalar(self) -> bool {
        self.wire_type() != WireType::LengthDelimited
    }

    pub fn is_float(self) -> bool {
        self == TypeKind::Float || self == TypeKind::Double
    }

    /// The JSON literal written for an unset field of this kind.
    pub fn default_literal(self) -> &'static str {
        match self {
            TypeKind::Bool => "false",
            TypeKind::String | TypeKind::Bytes => "\"\"",
            TypeKind::Message | TypeKind::Map => "{}",
            _ => "0",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Int32 => "int32",
            TypeKind::Uint32 => "uint32",
            TypeKind::Int64 => "int64",
            TypeKind::Uint64 => "uint64",
            TypeKind::Bool => "bool",
            TypeKind::Float => "float",
            TypeKind::Double => "double",
            TypeKind::Fixed32 => "fixed32",
            TypeKind::Fixed64 => "fixed64",
            TypeKind::Enum => "enum",
            TypeKind::Sfixed32 => "sfixed32",
            TypeKind::Sfixed64 => "sfixed64",
            TypeKind::Sint32 => "sint32",
            TypeKind::Sint64 => "sint64",
            TypeKind::String => "string",
            TypeKind::Bytes => "bytes",
            TypeKind::Message => "message",
            TypeKind::Map => "map",
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The request channel a field is bound from when encoding key/value input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindSource {
    /// Form body values.
    Default,
    Context,
    Query,
    Header,
    Params,
}

impl Default for BindSource {
    fn default() -> Self {
        BindSource::Default
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    pub omit_empty: bool,
    pub raw_data: bool,
    pub validate: bool,
    pub bind: BindSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u32);

impl MessageId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub tag: u32,
    /// The name used as JSON object key and key/value lookup key.
    pub name: String,
    pub kind: TypeKind,
    pub repeated: bool,
    /// Embedded message type, set for message and map kinds.
    pub message: Option<MessageId>,
    pub options: FieldOptions,
}

impl Field {
    /// Whether a JSON `null` is acceptable for this field.
    pub fn nullable(&self) -> bool {
        self.repeated
            || self.kind == TypeKind::Bytes
            || self.kind == TypeKind::Map
            || self.kind == TypeKind::Message
    }

    /// Repeated numeric fields may arrive packed.
    pub fn accepts_wire_type(&self, wire: WireType) -> bool {
        let expect = self.kind.wire_type();
        expect == wire
            || (self.repeated && wire == WireType::LengthDelimited)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageOptions {
    /// Serialize without surrounding braces, splicing the fields into the
    /// enclosing object.
    pub flat: bool,
}

/// Tag to field position lookup, baked once all fields are known.
#[derive(Debug, Clone, PartialEq)]
enum TagIndex {
    /// Indexed directly by tag, `NO_FIELD` for unused slots.
    Dense(Vec<u32>),
    /// `(tag, position)` pairs sorted by tag.
    Sparse(Vec<(u32, u32)>),
}

const NO_FIELD: u32 = u32::max_value();

impl TagIndex {
    fn bake(fields: &[Field]) -> TagIndex {
        let max_tag = fields.iter().map(|f| f.tag).max().unwrap_or(0);

        if (max_tag as i64) - (fields.len() as i64) < 3 {
            let mut slots = vec![NO_FIELD; max_tag as usize + 1];
            for (i, f) in fields.iter().enumerate() {
                slots[f.tag as usize] = i as u32;
            }
            return TagIndex::Dense(slots);
        }

        let mut pairs: Vec<(u32, u32)> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.tag, i as u32))
            .collect();
        pairs.sort_unstable();
        TagIndex::Sparse(pairs)
    }

    fn resolve(&self, tag: u32) -> Option<usize> {
        match self {
            TagIndex::Dense(slots) => match slots.get(tag as usize) {
                Some(&i) if i != NO_FIELD => Some(i as usize),
                _ => None,
            },
            TagIndex::Sparse(pairs) => pairs
                .binary_search_by_key(&tag, |&(t, _)| t)
                .ok()
                .map(|pos| pairs[pos].1 as usize),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    name: String,
    fields: Vec<Field>,
    options: MessageOptions,
    tag_index: TagIndex,
    name_index: Vec<u32>,
}

impl Message {
    fn bake(name: String, fields: Vec<Field>, options: MessageOptions) -> Message {
        let tag_index = TagIndex::bake(&fields);
        let mut name_index: Vec<u32> = (0..fields.len() as u32).collect();
        name_index.sort_by(|&a, &b| {
            fields[a as usize].name.cmp(&fields[b as usize].name)
        });

        Message {
            name,
            fields,
            options,
            tag_index,
            name_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn options(&self) -> &MessageOptions {
        &self.options
    }

    pub fn is_flat(&self) -> bool {
        self.options.flat
    }

    /// Position of the field with `tag` in [`fields`](Message::fields).
    pub fn tag_index(&self, tag: u32) -> Option<usize> {
        self.tag_index.resolve(tag)
    }

    pub fn field_by_tag(&self, tag: u32) -> Option<&Field> {
        self.tag_index(tag).map(|i| &self.fields[i])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.name_index
            .binary_search_by(|&i| self.fields[i as usize].name.as_str().cmp(name))
            .ok()
            .map(|pos| &self.fields[self.name_index[pos] as usize])
    }

    /// A map entry has exactly a scalar `key` field (tag 1) and a singular
    /// `value` field (tag 2).
    fn looks_like_map_entry(&self) -> bool {
        if self.fields.len() != 2 {
            return false;
        }
        let key = &self.fields[0];
        let value = &self.fields[1];
        key.tag == 1
            && key.name == "key"
            && !key.repeated
            && valid_map_key(key.kind)
            && value.tag == 2
            && value.name == "value"
            && !value.repeated
    }
}

fn valid_map_key(kind: TypeKind) -> bool {
    match kind {
        TypeKind::Float
        | TypeKind::Double
        | TypeKind::Bytes
        | TypeKind::Message
        | TypeKind::Map
        | TypeKind::Enum => false,
        _ => true,
    }
}

/// An immutable, baked graph of message types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    messages: Vec<Message>,
    by_name: HashMap<String, MessageId>,
}

impl Schema {
    pub fn message(&self, id: MessageId) -> &Message {
        &self.messages[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<MessageId> {
        self.by_name.get(name).cloned()
    }

    pub fn message_by_name(&self, name: &str) -> Option<&Message> {
        self.lookup(name).map(|id| self.message(id))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The message type embedded by a message or map field.
    pub fn nested(&self, field: &Field) -> Result<&Message, TranscodeError> {
        field
            .message
            .and_then(|id| self.messages.get(id.index()))
            .ok_or_else(|| {
                TranscodeError::invalid_schema(format!(
                    "field {} has no message type",
                    field.name
                ))
            })
    }

    /// Key and value fields of a map field's entry type.
    pub fn map_entry(
        &self,
        field: &Field,
    ) -> Result<(&Field, &Field), TranscodeError> {
        let entry = self.nested(field)?;
        match entry.fields() {
            [key, value] => Ok((key, value)),
            _ => Err(TranscodeError::invalid_schema("map type error")),
        }
    }
}

/// Declarative description of one field, as found in a schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub tag: u32,
    pub name: String,
    pub kind: TypeKind,
    #[serde(default)]
    pub repeated: bool,
    /// Fully qualified name of the embedded message type.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    /// Overrides `name` as JSON key and binding key.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(flatten)]
    pub options: FieldOptions,
}

impl FieldDef {
    pub fn new<S: Into<String>>(tag: u32, name: S, kind: TypeKind) -> FieldDef {
        FieldDef {
            tag,
            name: name.into(),
            kind,
            repeated: false,
            type_name: None,
            alias: None,
            options: FieldOptions::default(),
        }
    }

    pub fn message<S: Into<String>>(tag: u32, name: S, type_name: S) -> FieldDef {
        let mut def = FieldDef::new(tag, name, TypeKind::Message);
        def.type_name = Some(type_name.into());
        def
    }

    pub fn repeated(mut self) -> FieldDef {
        self.repeated = true;
        self
    }

    pub fn omit_empty(mut self) -> FieldDef {
        self.options.omit_empty = true;
        self
    }

    pub fn raw_data(mut self) -> FieldDef {
        self.options.raw_data = true;
        self
    }

    pub fn validate(mut self) -> FieldDef {
        self.options.validate = true;
        self
    }

    pub fn bind(mut self, source: BindSource) -> FieldDef {
        self.options.bind = source;
        self
    }

    pub fn alias<S: Into<String>>(mut self, alias: S) -> FieldDef {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDef {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub flat: bool,
    #[serde(default)]
    pub map_entry: bool,
}

impl MessageDef {
    pub fn new<S: Into<String>>(name: S, fields: Vec<FieldDef>) -> MessageDef {
        MessageDef {
            name: name.into(),
            fields,
            flat: false,
            map_entry: false,
        }
    }

    pub fn flat(mut self) -> MessageDef {
        self.flat = true;
        self
    }

    pub fn map_entry(mut self) -> MessageDef {
        self.map_entry = true;
        self
    }
}

/// Collects message definitions and bakes them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    defs: Vec<MessageDef>,
}

impl SchemaBuilder {
    pub fn new() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn add(&mut self, def: MessageDef) -> &mut SchemaBuilder {
        self.defs.push(def);
        self
    }

    pub fn build(self) -> Result<Schema, TranscodeError> {
        let mut by_name = HashMap::with_capacity(self.defs.len());
        for (i, def) in self.defs.iter().enumerate() {
            if by_name
                .insert(def.name.clone(), MessageId(i as u32))
                .is_some()
            {
                return Err(TranscodeError::invalid_schema(format!(
                    "duplicate message {}",
                    def.name
                )));
            }
        }

        let mut entry_flags = Vec::with_capacity(self.defs.len());
        let mut messages = Vec::with_capacity(self.defs.len());
        for def in self.defs {
            let MessageDef {
                name: msg_name,
                fields: defs,
                flat,
                map_entry,
            } = def;
            let mut fields: Vec<Field> = Vec::with_capacity(defs.len());
            for fd in defs {
                if fd.tag == 0 || fd.tag > crate::wire::MAX_TAG {
                    return Err(TranscodeError::invalid_schema(format!(
                        "{}.{}: invalid tag {}",
                        msg_name, fd.name, fd.tag
                    )));
                }
                if fields.iter().any(|f| f.tag == fd.tag) {
                    return Err(TranscodeError::invalid_schema(format!(
                        "{}: duplicate tag {}",
                        msg_name, fd.tag
                    )));
                }
                let message = match fd.kind {
                    TypeKind::Message | TypeKind::Map => {
                        let type_name = fd.type_name.as_ref().ok_or_else(|| {
                            TranscodeError::invalid_schema(format!(
                                "{}.{}: missing message type",
                                msg_name, fd.name
                            ))
                        })?;
                        let id = by_name.get(type_name).ok_or_else(|| {
                            TranscodeError::invalid_schema(format!(
                                "{}.{}: unknown message type {}",
                                msg_name, fd.name, type_name
                            ))
                        })?;
                        Some(*id)
                    }
                    _ => None,
                };
                let name = fd.alias.unwrap_or(fd.name);
                if fields.iter().any(|f| f.name == name) {
                    return Err(TranscodeError::invalid_schema(format!(
                        "{}: duplicate field name {}",
                        msg_name, name
                    )));
                }
                fields.push(Field {
                    tag: fd.tag,
                    name,
                    kind: fd.kind,
                    repeated: fd.repeated || fd.kind == TypeKind::Map,
                    message,
                    options: fd.options,
                });
            }
            let msg = Message::bake(msg_name, fields, MessageOptions { flat });
            entry_flags.push(map_entry || msg.looks_like_map_entry());
            messages.push(msg);
        }

        // Repeated fields of map entry types are maps.
        for msg in messages.iter_mut() {
            for field in msg.fields.iter_mut() {
                if let Some(id) = field.message {
                    if field.kind == TypeKind::Message
                        && field.repeated
                        && entry_flags[id.index()]
                    {
                        field.kind = TypeKind::Map;
                    }
                }
            }
        }

        let schema = Schema { messages, by_name };
        for msg in schema.messages.iter() {
            for field in msg.fields() {
                if field.kind == TypeKind::Map {
                    let (key, value) = schema.map_entry(field)?;
                    if key.tag != 1 || value.tag != 2 || value.repeated {
                        return Err(TranscodeError::invalid_schema(format!(
                            "{}.{}: map type error",
                            msg.name, field.name
                        )));
                    }
                }
            }
        }

        Ok(schema)
    }
}

/// An RPC method a route forwards to.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub server: String,
    pub handler: String,
    /// `/<package>.<Service>/<Method>`
    pub name: String,
    pub input: MessageId,
    pub output: MessageId,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteOptions {
    pub middlewares: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub options: RouteOptions,
    pub call: Arc<Call>,
}

/// A schema together with the HTTP routes defined over it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub schema: Schema,
    pub routes: Vec<Route>,
}

impl Metadata {
    /// Concatenates several independently built metadata sets into one.
    /// Message ids of later parts are shifted past the earlier ones; on a
    /// message name clash the earliest definition is the one found by name.
    pub fn merge<'a, I>(parts: I) -> Metadata
    where
        I: IntoIterator<Item = &'a Metadata>,
    {
        let mut merged = Metadata::default();
        for part in parts {
            let offset = merged.schema.messages.len() as u32;
            let shift = |id: MessageId| MessageId(id.0 + offset);

            for msg in part.schema.messages.iter() {
                let mut msg = msg.clone();
                for field in msg.fields.iter_mut() {
                    field.message = field.message.map(shift);
                }
                merged.schema.messages.push(msg);
            }
            for (name, id) in part.schema.by_name.iter() {
                merged
                    .schema
                    .by_name
                    .entry(name.clone())
                    .or_insert_with(|| shift(*id));
            }
            for route in part.routes.iter() {
                let mut call = (*route.call).clone();
                call.input = shift(call.input);
                call.output = shift(call.output);
                merged.routes.push(Route {
                    method: route.method.clone(),
                    path: route.path.clone(),
                    options: route.options.clone(),
                    call: Arc::new(call),
                });
            }
        }
        merged
    }
}
