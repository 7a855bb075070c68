//! Loopback Simulation Demo
//!
//! Runs an authority and a predicting client in one process, joined by
//! the in-memory loopback transport. A steered craft accelerates under
//! client input while a passive beacon drifts on its own. Midway the
//! demo drops the client's input datagrams for a stretch to show a
//! divergence being detected and replayed away, then changes the
//! session time scale from the authority side.

use backstep_core::{EntityBehavior, EntityId, EntityLayout, PeerId, World};
use backstep_netcode::{
    Authority, ClockConfig, LoopbackTransport, Predictor, SyncConfig, SyncEvent,
};

const DT: f64 = 1.0 / 60.0;
const CRAFT: u32 = 1;
const BEACON: u32 = 2;
const SERVER: u64 = 1;
const CLIENT: u64 = 100;

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn write_f32(bytes: &mut [u8], at: usize, value: f32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// State: x, y, vx, vy. Input: steering direction as two signed bytes.
struct Craft;

impl Craft {
    const THRUST: f32 = 0.4;
    const DRAG: f32 = 0.98;
}

impl EntityBehavior for Craft {
    fn apply_inputs(&mut self, state: &mut [u8], current: &[u8], _previous: &[u8]) {
        let dx = current[0] as i8 as f32;
        let dy = current[1] as i8 as f32;
        write_f32(state, 8, read_f32(state, 8) + dx * Self::THRUST);
        write_f32(state, 12, read_f32(state, 12) + dy * Self::THRUST);
    }

    fn simulate(&mut self, state: &mut [u8], dt: f64) {
        let vx = read_f32(state, 8) * Self::DRAG;
        let vy = read_f32(state, 12) * Self::DRAG;
        write_f32(state, 0, read_f32(state, 0) + vx * dt as f32);
        write_f32(state, 4, read_f32(state, 4) + vy * dt as f32);
        write_f32(state, 8, vx);
        write_f32(state, 12, vy);
    }
}

/// Craft that steers itself in a slow square pattern.
struct SteeredCraft {
    frame: u32,
}

impl EntityBehavior for SteeredCraft {
    fn apply_inputs(&mut self, state: &mut [u8], current: &[u8], previous: &[u8]) {
        Craft.apply_inputs(state, current, previous);
    }

    fn simulate(&mut self, state: &mut [u8], dt: f64) {
        Craft.simulate(state, dt);
    }

    fn collect_input(&mut self, out: &mut [u8]) {
        self.frame += 1;
        let (dx, dy): (i8, i8) = match (self.frame / 60) % 4 {
            0 => (1, 0),
            1 => (0, 1),
            2 => (-1, 0),
            _ => (0, -1),
        };
        out[0] = dx as u8;
        out[1] = dy as u8;
    }
}

/// State: x, y. No input; it orbits the origin on both sides alike.
struct Beacon;

impl EntityBehavior for Beacon {
    fn simulate(&mut self, state: &mut [u8], dt: f64) {
        let x = read_f32(state, 0);
        let y = read_f32(state, 4);
        write_f32(state, 0, x - y * dt as f32);
        write_f32(state, 4, y + x * dt as f32);
    }
}

fn craft_layout() -> EntityLayout {
    EntityLayout {
        state_bytes: 16,
        input_bytes: 4,
        order_key: 0,
    }
}

fn beacon_layout() -> EntityLayout {
    EntityLayout {
        state_bytes: 8,
        input_bytes: 0,
        order_key: 1,
    }
}

fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::SnapshotApplied { tick, diverged } if *diverged => {
            format!("snapshot {tick} applied (diverged)")
        }
        SyncEvent::SnapshotApplied { tick, .. } => format!("snapshot {tick} applied"),
        SyncEvent::DivergenceDetected { tick, entities } => {
            format!("divergence at tick {tick} across {entities} entities")
        }
        SyncEvent::Resimulated { from, to } => format!("resimulated ticks {from}..={to}"),
        SyncEvent::ClockSnapped { from, to } => format!("clock snapped {from} -> {to}"),
        SyncEvent::FullResend { peer, tick } => format!("full resend of tick {tick} to {peer}"),
        SyncEvent::Fragmented { peer, tick, bytes } => {
            format!("tick {tick} fragmented for {peer} ({bytes} bytes)")
        }
    }
}

fn main() {
    println!("=== Backstep Loopback Demo ===\n");

    let mut server_world = World::new(64);
    let craft = EntityId::new(CRAFT);
    let beacon = EntityId::new(BEACON);
    server_world.register(craft, craft_layout(), Box::new(Craft)).unwrap();
    server_world.register(beacon, beacon_layout(), Box::new(Beacon)).unwrap();

    let mut client_world = World::new(64);
    client_world
        .register(craft, craft_layout(), Box::new(SteeredCraft { frame: 0 }))
        .unwrap();
    client_world.register(beacon, beacon_layout(), Box::new(Beacon)).unwrap();

    let server_peer = PeerId::new(SERVER);
    let client_peer = PeerId::new(CLIENT);

    let mut authority = Authority::new(server_world, ClockConfig::new(60), LoopbackTransport::new());
    authority.connect_peer(client_peer).unwrap();
    authority.assign_control(client_peer, craft).unwrap();

    let mut client = Predictor::new(
        client_world,
        ClockConfig::new(60),
        SyncConfig::default(),
        LoopbackTransport::new(),
        server_peer,
    );
    client.control(craft).unwrap();
    client.set_ready(true);

    println!("Craft {craft} is client-steered; beacon {beacon} is server-driven.\n");

    let mut divergences = 0;
    let mut resimulations = 0;
    for frame in 1..=360u32 {
        // a stretch of one-way loss: client input stops arriving
        if frame == 120 {
            println!("-- frame 120: dropping all client input datagrams --");
            client.transport_mut().drop_every(1);
        }
        if frame == 130 {
            println!("-- frame 130: delivery restored --");
            client.transport_mut().deliver_all();
        }
        // the authority slows the whole session down, then restores it
        if frame == 240 {
            println!("-- frame 240: authority sets time scale 0.5 --");
            authority.set_time_scale(0.5);
        }
        if frame == 300 {
            println!("-- frame 300: authority sets time scale 1.0 --");
            authority.set_time_scale(1.0);
        }

        let events = client.advance(DT).unwrap();
        for event in &events {
            match event {
                SyncEvent::SnapshotApplied { tick, .. } => {
                    authority.acknowledge_snapshot(client_peer, *tick).unwrap();
                }
                SyncEvent::DivergenceDetected { .. } => {
                    divergences += 1;
                    println!("   client: {}", describe(event));
                }
                SyncEvent::Resimulated { .. } => {
                    resimulations += 1;
                    println!("   client: {}", describe(event));
                }
                other => println!("   client: {}", describe(other)),
            }
        }

        for bytes in client.transport_mut().drain(server_peer) {
            authority.handle_message(client_peer, &bytes).unwrap();
        }
        for event in authority.advance(DT).unwrap() {
            println!("   server: {}", describe(&event));
        }
        for bytes in authority.transport_mut().drain(client_peer) {
            client.handle_message(&bytes).unwrap();
        }

        if frame % 60 == 0 {
            let predicted = client.world().state(craft, client.tick()).unwrap();
            let confirmed = authority.world().state(craft, authority.tick()).unwrap();
            println!(
                "frame {frame}: client tick {} (authority {}), craft predicted ({:.2}, {:.2}) confirmed ({:.2}, {:.2})",
                client.tick(),
                authority.tick(),
                read_f32(predicted, 0),
                read_f32(predicted, 4),
                read_f32(confirmed, 0),
                read_f32(confirmed, 4),
            );
        }
    }

    println!("\nDivergences detected: {divergences}");
    println!("Resimulations: {resimulations}");
    println!("Round trip estimate: {:.1} ms", client.clock().rtt_estimate() * 1000.0);
    println!("\n=== Demo Complete ===");
}
