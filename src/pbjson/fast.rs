// Copyright 2020 Joyent, Inc.

//! Single-pass wire to JSON conversion.
//!
//! Encoders usually write fields in declaration order, each field in one
//! run of consecutive entries. For such records the JSON members can be
//! written while the wire is being read: consecutive entries with the same
//! tag reuse the resolved field and the open `[` or `{`, which is closed
//! when the tag changes. Defaults of declared fields the wire skipped are
//! written as the walk passes them.
//!
//! A tag seen before the current run, or seen again after its run ended,
//! means the record is not in that shape. The members written so far are
//! dropped and the message is converted by the standard path instead, so
//! the output is always the same as the standard encoder's.
//!
//! A walk that fails is redone the same way. The walk writes a singular
//! message field each time it appears while the standard path only decodes
//! the last occurrence, so an error from the walk is not final; the
//! standard path decides the result.

use super::{spliced, wire_mismatch, Encoder};
use crate::error::TranscodeError;
use crate::metadata::{Message, Schema, TypeKind};
use crate::wire::WireReader;

/// The field whose run is being written.
struct Run {
    idx: usize,
    /// Buffer length before the field's value, for last-wins rewrites.
    value_at: usize,
    /// The `more` flag before the field, for spliced rewrites.
    more_before: bool,
    close: Option<u8>,
    first: bool,
}

impl Encoder {
    pub(super) fn fast_members(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
        more: &mut bool,
    ) -> Result<(), TranscodeError> {
        let start = self.buf.len();
        let more_at_start = *more;
        if let Ok(true) = self.walk(schema, msg, data, more) {
            return Ok(());
        }
        self.buf.truncate(start);
        *more = more_at_start;
        // Nested messages were already tried by the walk.
        self.fast = false;
        let result = self.members(schema, msg, data, more);
        self.fast = true;
        result
    }

    /// Returns `false` when the record is out of declaration order.
    fn walk(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
        more: &mut bool,
    ) -> Result<bool, TranscodeError> {
        let fields = msg.fields();
        let mut next = 0;
        let mut run: Option<Run> = None;
        let mut r = WireReader::new(data);

        while let Some((tag, wire)) = r.decode_key()? {
            let value = r.decode_value(wire)?;
            let idx = match msg.tag_index(tag) {
                Some(idx) => idx,
                None => continue,
            };
            let field = &fields[idx];
            if !field.accepts_wire_type(wire) {
                return Err(wire_mismatch(field, wire));
            }

            if let Some(ref mut cur) = run {
                if cur.idx == idx {
                    if field.kind == TypeKind::Map {
                        self.write_entry(schema, field, value.bytes(), &mut cur.first)?;
                    } else if field.repeated {
                        self.write_element(schema, field, &value, &mut cur.first)?;
                    } else if spliced(schema, field)? {
                        self.buf.truncate(cur.value_at);
                        *more = cur.more_before;
                        self.splice(schema, schema.nested(field)?, value.bytes(), more)?;
                    } else {
                        self.buf.truncate(cur.value_at);
                        self.write_value(schema, field, &value)?;
                    }
                    continue;
                }
            }
            if idx < next {
                return Ok(false);
            }

            if let Some(Run {
                close: Some(c), ..
            }) = run
            {
                self.buf.push(c);
            }
            for skipped in &fields[next..idx] {
                self.write_default(schema, skipped, more)?;
            }
            next = idx + 1;

            let mut cur = Run {
                idx,
                value_at: self.buf.len(),
                more_before: *more,
                close: None,
                first: true,
            };
            if spliced(schema, field)? {
                self.splice(schema, schema.nested(field)?, value.bytes(), more)?;
            } else {
                self.write_name(field, more);
                cur.value_at = self.buf.len();
                if field.kind == TypeKind::Map {
                    self.buf.push(b'{');
                    cur.close = Some(b'}');
                    self.write_entry(schema, field, value.bytes(), &mut cur.first)?;
                } else if field.repeated {
                    self.buf.push(b'[');
                    cur.close = Some(b']');
                    self.write_element(schema, field, &value, &mut cur.first)?;
                } else {
                    self.write_value(schema, field, &value)?;
                }
            }
            run = Some(cur);
        }

        if let Some(Run {
            close: Some(c), ..
        }) = run
        {
            self.buf.push(c);
        }
        for skipped in &fields[next..] {
            self.write_default(schema, skipped, more)?;
        }
        Ok(true)
    }
}
