use mesh_lab_abstract::{
    FiveTuple, FlowId, FlowTelemetry, MeshLabError, MeshPointReport, MeshReport, NodeIndex,
    PROTOCOL_UDP, RawFlowRecord, Result, SimulationContext, SimulationEngine,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use tracing::{debug, info};

/// IPv4 + UDP header bytes added to every application payload.
pub const HEADER_BYTES: u64 = 28;
/// First ephemeral port handed to a source socket on each node.
const EPHEMERAL_PORT_BASE: u16 = 49153;
/// Port the control beacons are addressed to.
const BEACON_PORT: u16 = 698;
const BEACON_PAYLOAD: u32 = 64;
/// Separates the engine's random stream from the traffic generator's.
const ENGINE_STREAM: u64 = 0x9e37_79b9_7f4a_7c15;

type Nanos = u64;

fn to_nanos(seconds: f64) -> Nanos {
    (seconds * 1e9).round() as Nanos
}

fn to_seconds(nanos: Nanos) -> f64 {
    nanos as f64 / 1e9
}

#[derive(Debug)]
enum EventType {
    /// The on/off source of an installed flow emits its next packet.
    Transmit { app: usize },
    /// A node broadcasts a control beacon to the subnet.
    Beacon { node: NodeIndex },
    /// A packet reaches its destination. Beacons have no sink node.
    Arrival {
        flow: FlowId,
        sink: Option<NodeIndex>,
        sent_at: Nanos,
        bytes: u64,
    },
}

#[derive(Debug)]
struct Event {
    time: Nanos,
    event_type: EventType,
    id: u64,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the earliest event first.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Installed on/off source application.
#[derive(Debug)]
struct SourceApp {
    source: NodeIndex,
    destination: NodeIndex,
    tuple: FiveTuple,
    stop: Nanos,
}

/// A packet about to enter the channel.
#[derive(Debug, Clone, Copy)]
struct Outgoing {
    tuple: FiveTuple,
    origin: NodeIndex,
    sink: Option<NodeIndex>,
    hops: u32,
    bytes: u64,
}

/// Built-in engine: constant bit rate sources over a lossy multi-hop channel.
///
/// Each packet crosses the grid hop distance between its endpoints; every hop
/// may lose it with `loss_rate` and adds a latency drawn from
/// `min_latency..=max_latency`. Nothing is delivered after `total_time`. No
/// propagation or routing is modelled.
///
/// Per mesh point counters of the last run are kept for [`SimulationEngine::mesh_report`].
#[derive(Debug, Default)]
pub struct LossyChannelEngine {
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,
    flow_ids: HashMap<FiveTuple, FlowId>,
    records: BTreeMap<FlowId, RawFlowRecord>,
    dropped: u64,
    mesh: Option<MeshReport>,
}

impl LossyChannelEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, ctx: &SimulationContext) {
        *self = Self {
            mesh: Some(MeshReport::for_grid(ctx)),
            ..Self::default()
        };
    }

    fn mesh_point(&mut self, node: NodeIndex) -> Option<&mut MeshPointReport> {
        self.mesh.as_mut().and_then(|mesh| mesh.point_mut(node))
    }

    fn push_event(&mut self, time: Nanos, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Flow ids start at 1 and follow the order of first transmission.
    fn flow_id(&mut self, tuple: FiveTuple) -> FlowId {
        let next = FlowId(self.flow_ids.len() as u32 + 1);
        *self.flow_ids.entry(tuple).or_insert(next)
    }

    fn record_tx(&mut self, tuple: FiveTuple, now: Nanos, bytes: u64) -> FlowId {
        let id = self.flow_id(tuple);
        let record = self.records.entry(id).or_default();
        if record.tx_packets == 0 {
            record.time_first_tx = to_seconds(now);
        }
        record.time_last_tx = to_seconds(now);
        record.tx_packets += 1;
        record.tx_bytes += bytes;
        id
    }

    fn record_rx(
        &mut self,
        flow: FlowId,
        sink: Option<NodeIndex>,
        now: Nanos,
        sent_at: Nanos,
        bytes: u64,
    ) {
        if let Some(point) = sink.and_then(|node| self.mesh_point(node)) {
            point.packets_sunk += 1;
            point.bytes_sunk += bytes;
        }
        let record = self.records.entry(flow).or_default();
        if record.rx_packets == 0 {
            record.time_first_rx = to_seconds(now);
        }
        record.time_last_rx = to_seconds(now);
        record.rx_packets += 1;
        record.rx_bytes += bytes;
        record.delay_sum += to_seconds(now - sent_at);
    }

    /// Push a packet through `hops` lossy hops; returns the arrival time if it survives.
    fn traverse(
        &self,
        rng: &mut StdRng,
        ctx: &SimulationContext,
        hops: u32,
        now: Nanos,
    ) -> Option<Nanos> {
        let channel = &ctx.config().channel;
        let mut arrival = now;
        for _ in 0..hops {
            if rng.random::<f64>() < channel.loss_rate {
                return None;
            }
            let latency_ms = rng.random_range(channel.min_latency..=channel.max_latency);
            arrival = arrival.saturating_add(latency_ms.saturating_mul(1_000_000));
        }
        Some(arrival)
    }

    fn send(&mut self, rng: &mut StdRng, ctx: &SimulationContext, packet: Outgoing, now: Nanos) {
        let flow = self.record_tx(packet.tuple, now, packet.bytes);
        match self.traverse(rng, ctx, packet.hops, now) {
            Some(arrival) => self.push_event(
                arrival,
                EventType::Arrival {
                    flow,
                    sink: packet.sink,
                    sent_at: now,
                    bytes: packet.bytes,
                },
            ),
            None => {
                debug!("flow {flow}: packet sent at {:.6}s lost in channel", to_seconds(now));
                self.dropped += 1;
                if let Some(record) = self.records.get_mut(&flow) {
                    record.dropped_packets += 1;
                }
                if let Some(point) = self.mesh_point(packet.origin) {
                    point.channel_drops += 1;
                }
            }
        }
    }
}

impl SimulationEngine for LossyChannelEngine {
    fn name(&self) -> &str {
        "lossy-channel"
    }

    fn run(&mut self, ctx: &SimulationContext) -> Result<FlowTelemetry> {
        self.reset(ctx);
        let config = ctx.config();
        let broadcast = config.subnet.broadcast()?;
        let mut rng = StdRng::seed_from_u64(config.seed ^ ENGINE_STREAM);
        let end = to_nanos(config.total_time);
        let payload = config.packet_size;
        let interval = to_nanos(config.tx_rate.transmission_time(payload)).max(1);
        let data_bytes = u64::from(payload) + HEADER_BYTES;

        // One source socket per flow, each on the next ephemeral port of its node.
        let mut next_port: HashMap<NodeIndex, u16> = HashMap::new();
        let mut apps = Vec::with_capacity(ctx.flows().len());
        for flow in ctx.flows() {
            let (Some(src), Some(dst)) = (ctx.node(flow.source), ctx.node(flow.destination)) else {
                return Err(MeshLabError::Engine(format!(
                    "cannot install flow {} -> {}: node missing from the grid",
                    flow.source, flow.destination
                )));
            };
            let port = next_port.entry(flow.source).or_insert(EPHEMERAL_PORT_BASE);
            let tuple = FiveTuple {
                source_address: src.address,
                destination_address: dst.address,
                protocol: PROTOCOL_UDP,
                source_port: *port,
                // The sink listens on the same port the source targets.
                destination_port: flow.dest_port,
            };
            *port = port.wrapping_add(1);
            apps.push(SourceApp {
                source: flow.source,
                destination: flow.destination,
                tuple,
                stop: to_nanos(flow.stop_time),
            });
            let app = apps.len() - 1;
            self.push_event(to_nanos(flow.start_time), EventType::Transmit { app });
        }

        let beacon_period = to_nanos(config.channel.beacon_interval);
        if beacon_period > 0 {
            let jitter = to_nanos(config.random_start);
            for node in 0..ctx.nodes().len() {
                let offset = if jitter > 0 { rng.random_range(0..=jitter) } else { 0 };
                self.push_event(offset, EventType::Beacon { node });
            }
        }

        info!(
            "{} engine: {} nodes, {} flows, {} stack, {} interface(s), {}",
            self.name(),
            ctx.nodes().len(),
            apps.len(),
            config.stack,
            config.n_ifaces,
            if config.multi_channel { "spread channels" } else { "single channel" }
        );

        while let Some(event) = self.event_queue.pop() {
            if event.time > end {
                break;
            }
            let now = event.time;
            match event.event_type {
                EventType::Transmit { app: index } => {
                    let app = &apps[index];
                    if now >= app.stop {
                        continue;
                    }
                    let packet = Outgoing {
                        tuple: app.tuple,
                        origin: app.source,
                        sink: Some(app.destination),
                        hops: ctx.hop_distance(app.source, app.destination),
                        bytes: data_bytes,
                    };
                    let stop = app.stop;
                    if let Some(point) = self.mesh_point(packet.origin) {
                        point.packets_sourced += 1;
                        point.bytes_sourced += packet.bytes;
                    }
                    self.send(&mut rng, ctx, packet, now);
                    let next = now + interval;
                    if next < stop {
                        self.push_event(next, EventType::Transmit { app: index });
                    }
                }
                EventType::Beacon { node } => {
                    if let Some(mesh_node) = ctx.node(node) {
                        let tuple = FiveTuple {
                            source_address: mesh_node.address,
                            destination_address: broadcast,
                            protocol: PROTOCOL_UDP,
                            source_port: BEACON_PORT,
                            destination_port: BEACON_PORT,
                        };
                        if let Some(point) = self.mesh_point(node) {
                            point.beacons_sent += 1;
                        }
                        let packet = Outgoing {
                            tuple,
                            origin: node,
                            sink: None,
                            hops: 1,
                            bytes: u64::from(BEACON_PAYLOAD) + HEADER_BYTES,
                        };
                        self.send(&mut rng, ctx, packet, now);
                    }
                    self.push_event(now + beacon_period, EventType::Beacon { node });
                }
                EventType::Arrival {
                    flow,
                    sink,
                    sent_at,
                    bytes,
                } => self.record_rx(flow, sink, now, sent_at, bytes),
            }
        }

        let mut telemetry = FlowTelemetry::default();
        let tuples: Vec<(FiveTuple, FlowId)> = self.flow_ids.drain().collect();
        for (tuple, id) in tuples {
            let mut record = self.records.remove(&id).unwrap_or_default();
            record.lost_packets = record.tx_packets.saturating_sub(record.rx_packets);
            telemetry.record(id, tuple, record);
        }
        info!(
            "{} engine finished at {:.1}s: {} flows observed, {} packets dropped in channel",
            self.name(),
            config.total_time,
            telemetry.records.len(),
            self.dropped
        );
        Ok(telemetry)
    }

    fn mesh_report(&self) -> Option<MeshReport> {
        self.mesh.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{HEADER_BYTES, LossyChannelEngine};
    use mesh_lab_abstract::{
        ExperimentConfig, FlowId, MAX_HOP_LATENCY_MS, SimulationContext, SimulationEngine,
        TrafficFlow,
    };

    fn context(loss_rate: f64, beacons: f64, flows: Vec<TrafficFlow>) -> SimulationContext {
        let mut config = ExperimentConfig {
            x_size: 2,
            y_size: 2,
            total_time: 100.0,
            packet_size: 1000,
            tx_rate: "8kbps".parse().unwrap(),
            seed: 5,
            ..Default::default()
        };
        config.channel.loss_rate = loss_rate;
        config.channel.beacon_interval = beacons;
        let mut ctx = SimulationContext::new(config).unwrap();
        ctx.install_traffic(flows).unwrap();
        ctx
    }

    fn flow(source: usize, destination: usize, start: f64, stop: f64) -> TrafficFlow {
        TrafficFlow {
            source,
            destination,
            start_time: start,
            stop_time: stop,
            dest_port: 49050,
        }
    }

    #[test]
    fn lossless_channel_delivers_every_packet() {
        let ctx = context(0.0, 0.0, vec![flow(0, 3, 10.0, 20.0)]);
        let telemetry = LossyChannelEngine::new().run(&ctx).unwrap();
        assert_eq!(telemetry.records.len(), 1);
        let (id, record) = telemetry.records.iter().next().unwrap();
        // One 1000-byte packet per second at 8 kbps, stop is exclusive.
        assert_eq!(record.tx_packets, 10);
        assert_eq!(record.rx_packets, 10);
        assert_eq!(record.tx_bytes, 10 * (1000 + HEADER_BYTES));
        assert_eq!(record.lost_packets, 0);
        assert_eq!(record.time_first_tx, 10.0);
        assert_eq!(record.time_last_tx, 19.0);
        assert!(record.delay_sum > 0.0);

        let tuple = telemetry.classifier.find_flow(*id).unwrap();
        assert_eq!(tuple.destination_port, 49050);
        assert_eq!(tuple.destination_address, ctx.node(3).unwrap().address);
    }

    #[test]
    fn total_loss_counts_drops() {
        let ctx = context(1.0, 0.0, vec![flow(1, 2, 10.0, 15.0)]);
        let telemetry = LossyChannelEngine::new().run(&ctx).unwrap();
        let record = telemetry.records.values().next().unwrap();
        assert_eq!(record.tx_packets, 5);
        assert_eq!(record.rx_packets, 0);
        assert_eq!(record.dropped_packets, 5);
        assert_eq!(record.lost_packets, 5);
    }

    #[test]
    fn beacons_show_up_as_broadcast_flows() {
        let ctx = context(0.0, 1.0, vec![flow(0, 1, 10.0, 12.0)]);
        let telemetry = LossyChannelEngine::new().run(&ctx).unwrap();
        let subnet = ctx.config().subnet;
        let broadcast = telemetry
            .records
            .keys()
            .filter(|id| {
                let tuple = telemetry.classifier.find_flow(**id).unwrap();
                subnet.is_directed_broadcast(tuple.destination_address)
            })
            .count();
        assert_eq!(broadcast, 4);
        assert_eq!(telemetry.records.len(), 5);
    }

    #[test]
    fn runs_are_reproducible() {
        let ctx = context(0.3, 2.0, vec![flow(0, 3, 10.0, 40.0), flow(2, 1, 30.0, 60.0)]);
        let mut engine = LossyChannelEngine::new();
        let a = engine.run(&ctx).unwrap();
        let b = engine.run(&ctx).unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn mesh_report_counts_per_node_traffic() {
        let ctx = context(0.0, 1.0, vec![flow(0, 3, 10.0, 20.0)]);
        let mut engine = LossyChannelEngine::new();
        assert!(engine.mesh_report().is_none());
        let telemetry = engine.run(&ctx).unwrap();

        let report = engine.mesh_report().unwrap();
        assert_eq!(report.points.len(), 4);
        assert_eq!(report.at_time, 100.0);
        let (source, sink) = (&report.points[0], &report.points[3]);
        assert_eq!(source.packets_sourced, 10);
        assert_eq!(source.bytes_sourced, 10 * (1000 + HEADER_BYTES));
        assert_eq!(source.packets_sunk, 0);
        assert_eq!(sink.packets_sunk, 10);
        assert_eq!(sink.address, ctx.node(3).unwrap().address);
        for point in &report.points {
            // Beacons start within the first 100 ms and repeat every second.
            assert!(point.beacons_sent >= 100, "node {} sent {}", point.node, point.beacons_sent);
            assert_eq!(point.channel_drops, 0);
        }

        let is_data = |id: FlowId| {
            telemetry.classifier.find_flow(id).unwrap().destination_port == 49050
        };
        let data_rx: u64 = telemetry
            .records
            .iter()
            .filter(|(id, _)| is_data(**id))
            .map(|(_, record)| record.rx_packets)
            .sum();
        let sunk: u64 = report.points.iter().map(|p| p.packets_sunk).sum();
        assert_eq!(sunk, data_rx);
    }

    #[test]
    fn mesh_report_charges_drops_to_the_sender() {
        let ctx = context(1.0, 0.0, vec![flow(1, 2, 10.0, 15.0)]);
        let mut engine = LossyChannelEngine::new();
        engine.run(&ctx).unwrap();
        let report = engine.mesh_report().unwrap();
        assert_eq!(report.points[1].packets_sourced, 5);
        assert_eq!(report.points[1].channel_drops, 5);
        assert_eq!(report.points[2].packets_sunk, 0);
        assert_eq!(report.points[0].channel_drops + report.points[3].channel_drops, 0);
    }

    #[test]
    fn latency_ceiling_is_simulated_without_overflow() {
        let mut config = ExperimentConfig {
            x_size: 2,
            y_size: 2,
            total_time: 100.0,
            packet_size: 1000,
            tx_rate: "8kbps".parse().unwrap(),
            ..Default::default()
        };
        config.channel.loss_rate = 0.0;
        config.channel.beacon_interval = 0.0;
        config.channel.min_latency = MAX_HOP_LATENCY_MS;
        config.channel.max_latency = MAX_HOP_LATENCY_MS;
        let mut ctx = SimulationContext::new(config).unwrap();
        // Nodes 0 and 1 share a grid column: one hop apart.
        ctx.install_traffic(vec![flow(0, 1, 10.0, 20.0)]).unwrap();

        let telemetry = LossyChannelEngine::new().run(&ctx).unwrap();
        let record = telemetry.records.values().next().unwrap();
        assert_eq!(record.rx_packets, 10);
        assert!((record.delay_sum / 10.0 - 60.0).abs() < 1e-9);
        assert_eq!(record.time_first_rx, 70.0);
    }
}
