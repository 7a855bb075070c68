//! Wire messages
//!
//! Three messages cross the connection, wrapped in a one-byte tag
//! envelope:
//! - [`InputMessage`], client to authority: a redundant window of the
//!   newest input records plus the ready flag and send-time echo seed
//! - [`DeltaSnapshotMessage`], authority to client: one tick's world
//!   image as a strategy-encoded delta against an acknowledged baseline
//! - [`FragmentedAck`], client to authority: confirms a reliable-path
//!   snapshot so the sender can resume delta encoding from it
//!
//! Record payloads are sized by the receiver's registry, so both sides
//! must register entities with identical layouts. Decoding is strict:
//! unknown tags, reserved flag bits, and trailing bytes are errors.

use crate::error::{Error, Result};
use crate::payload::{PayloadReader, PayloadWriter};
use backstep_core::{EntityId, Tick, World};
use serde::{Deserialize, Serialize};

const TAG_INPUT: u8 = 1;
const TAG_DELTA_SNAPSHOT: u8 = 2;
const TAG_FRAGMENTED_ACK: u8 = 3;

const INPUT_FLAG_READY: u8 = 0x01;
const INPUT_WINDOW_SHIFT: u8 = 1;
const INPUT_FLAG_RESERVED: u8 = 0xF0;

const DELTA_FLAG_BASELINE: u8 = 0x01;
const DELTA_FLAG_TIME_SCALE: u8 = 0x02;
const DELTA_FLAG_FRAGMENTED: u8 = 0x04;
const DELTA_FLAG_RESERVED: u8 = 0xF8;

/// Largest input window a single message can carry
pub const MAX_INPUT_WINDOW: u8 = 8;

fn wire_tick(tick: Tick) -> Result<i32> {
    i32::try_from(tick).map_err(|_| Error::TickOutOfRange(tick))
}

/// One entity's slice of an input batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInputs {
    pub entity: EntityId,
    /// `records[0]` is for the message tick, `records[1]` for the tick
    /// before, and so on; lengths must match the receiver's registry
    pub records: Vec<Vec<u8>>,
}

/// Client-to-authority input batch
///
/// Re-sends a sliding window of the newest ticks so that any single
/// lost packet is covered by the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    /// Newest tick in the batch
    pub tick: Tick,
    /// Sender's clock at send time, echoed back for RTT measurement
    pub client_time: f64,
    /// Sender is ready to receive state updates
    pub ready: bool,
    /// Ticks of input per entity (1..=8)
    pub window: u8,
    pub entities: Vec<EntityInputs>,
}

/// Authority-to-client state update for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSnapshotMessage {
    pub tick: Tick,
    /// Tick the payload is relative to; `None` means relative to zero
    pub baseline_tick: Option<Tick>,
    /// Authority's rate multiplier, sent only while it is not 1.0
    pub time_scale: Option<f32>,
    /// Client send time being echoed back
    pub echoed_client_time: f64,
    /// Uncompressed word count of the encoded image
    pub word_count: u32,
    /// Sent on the reliable channel because it exceeded the unreliable
    /// ceiling; the receiver must answer with a [`FragmentedAck`]
    pub fragmented: bool,
    /// Strategy-encoded delta payload
    pub payload: Vec<u8>,
}

/// Confirms receipt of a reliable-path snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentedAck {
    pub tick: Tick,
}

/// Tagged union of everything that crosses the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Input(InputMessage),
    DeltaSnapshot(DeltaSnapshotMessage),
    FragmentedAck(FragmentedAck),
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = PayloadWriter::new();
        match self {
            Message::Input(msg) => encode_input(msg, &mut writer)?,
            Message::DeltaSnapshot(msg) => encode_delta(msg, &mut writer)?,
            Message::FragmentedAck(msg) => {
                writer.write_u8(TAG_FRAGMENTED_ACK);
                writer.write_i32(wire_tick(msg.tick)?);
            }
        }
        Ok(writer.into_bytes())
    }

    /// Decode one message; `world` supplies per-entity record sizes
    pub fn decode(bytes: &[u8], world: &World) -> Result<Message> {
        let mut reader = PayloadReader::new(bytes);
        let message = match reader.read_u8()? {
            TAG_INPUT => Message::Input(decode_input(&mut reader, world)?),
            TAG_DELTA_SNAPSHOT => Message::DeltaSnapshot(decode_delta(&mut reader)?),
            TAG_FRAGMENTED_ACK => Message::FragmentedAck(FragmentedAck {
                tick: Tick::from(reader.read_i32()?),
            }),
            tag => return Err(Error::UnknownMessageTag(tag)),
        };
        reader.expect_end()?;
        Ok(message)
    }
}

fn encode_input(msg: &InputMessage, writer: &mut PayloadWriter) -> Result<()> {
    if msg.window == 0 || msg.window > MAX_INPUT_WINDOW {
        return Err(Error::BadInputWindow(msg.window));
    }
    writer.write_u8(TAG_INPUT);
    writer.write_i32(wire_tick(msg.tick)?);
    writer.write_f64(msg.client_time);

    let mut flags = (msg.window - 1) << INPUT_WINDOW_SHIFT;
    if msg.ready {
        flags |= INPUT_FLAG_READY;
    }
    writer.write_u8(flags);

    writer.write_varu32(msg.entities.len() as u32);
    for entry in &msg.entities {
        if entry.records.len() != msg.window as usize {
            return Err(Error::BadInputWindow(entry.records.len() as u8));
        }
        writer.write_varu32(entry.entity.raw());
        for record in &entry.records {
            writer.write_bytes(record);
        }
    }
    Ok(())
}

fn decode_input(reader: &mut PayloadReader<'_>, world: &World) -> Result<InputMessage> {
    let tick = Tick::from(reader.read_i32()?);
    let client_time = reader.read_f64()?;

    let flags = reader.read_u8()?;
    if flags & INPUT_FLAG_RESERVED != 0 {
        return Err(Error::BadFlags(flags));
    }
    let ready = flags & INPUT_FLAG_READY != 0;
    let window = ((flags >> INPUT_WINDOW_SHIFT) & 0x07) + 1;

    let entity_count = reader.read_varu32()? as usize;
    let mut entities = Vec::with_capacity(entity_count);
    for _ in 0..entity_count {
        let entity = EntityId::new(reader.read_varu32()?);
        if !world.contains(entity) {
            return Err(Error::UnknownEntity(entity));
        }
        let record_len = world.input_len(entity)?;
        if record_len == 0 {
            return Err(Error::UnexpectedInput(entity));
        }
        let mut records = Vec::with_capacity(window as usize);
        for _ in 0..window {
            records.push(reader.read_bytes(record_len)?.to_vec());
        }
        entities.push(EntityInputs { entity, records });
    }

    Ok(InputMessage {
        tick,
        client_time,
        ready,
        window,
        entities,
    })
}

fn encode_delta(msg: &DeltaSnapshotMessage, writer: &mut PayloadWriter) -> Result<()> {
    writer.write_u8(TAG_DELTA_SNAPSHOT);
    writer.write_i32(wire_tick(msg.tick)?);

    let mut flags = 0u8;
    if msg.baseline_tick.is_some() {
        flags |= DELTA_FLAG_BASELINE;
    }
    if msg.time_scale.is_some() {
        flags |= DELTA_FLAG_TIME_SCALE;
    }
    if msg.fragmented {
        flags |= DELTA_FLAG_FRAGMENTED;
    }
    writer.write_u8(flags);

    if let Some(baseline) = msg.baseline_tick {
        writer.write_i32(wire_tick(baseline)?);
    }
    if let Some(scale) = msg.time_scale {
        writer.write_f32(scale);
    }
    writer.write_f64(msg.echoed_client_time);
    writer.write_varu32(msg.word_count);
    writer.write_bytes(&msg.payload);
    Ok(())
}

fn decode_delta(reader: &mut PayloadReader<'_>) -> Result<DeltaSnapshotMessage> {
    let tick = Tick::from(reader.read_i32()?);

    let flags = reader.read_u8()?;
    if flags & DELTA_FLAG_RESERVED != 0 {
        return Err(Error::BadFlags(flags));
    }
    let baseline_tick = if flags & DELTA_FLAG_BASELINE != 0 {
        Some(Tick::from(reader.read_i32()?))
    } else {
        None
    };
    let time_scale = if flags & DELTA_FLAG_TIME_SCALE != 0 {
        Some(reader.read_f32()?)
    } else {
        None
    };
    let fragmented = flags & DELTA_FLAG_FRAGMENTED != 0;

    let echoed_client_time = reader.read_f64()?;
    let word_count = reader.read_varu32()?;
    let payload = reader.read_bytes(reader.remaining())?.to_vec();

    Ok(DeltaSnapshotMessage {
        tick,
        baseline_tick,
        time_scale,
        echoed_client_time,
        word_count,
        fragmented,
        payload,
    })
}
