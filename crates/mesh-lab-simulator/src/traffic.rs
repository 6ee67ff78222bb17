use mesh_lab_abstract::{MeshLabError, NodeIndex, Result, TrafficFlow, TrafficParams};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use tracing::debug;

/// Builds the randomized traffic matrix: one independent flow per grid cell.
#[derive(Debug, Clone)]
pub struct TrafficGenerator {
    params: TrafficParams,
    duration: Exp<f64>,
}

impl TrafficGenerator {
    pub fn new(params: TrafficParams) -> Result<Self> {
        let duration = Exp::new(1.0 / params.mean_duration).map_err(|e| {
            MeshLabError::config(format!(
                "mean flow duration {} is unusable: {e}",
                params.mean_duration
            ))
        })?;
        Ok(Self { params, duration })
    }

    /// Draw `node_count` flows for a run lasting `total_time` seconds.
    pub fn generate<R: Rng>(
        &self,
        node_count: usize,
        total_time: f64,
        rng: &mut R,
    ) -> Result<Vec<TrafficFlow>> {
        if node_count <= 1 {
            return Err(MeshLabError::config(format!(
                "{node_count} node(s) cannot host a flow between distinct nodes"
            )));
        }
        self.params.validate(total_time)?;

        let start_window = self.params.start_window(total_time);
        let stop_limit = self.params.stop_limit(total_time);

        (0..node_count)
            .map(|i| -> Result<TrafficFlow> {
                let start_time = rng.random_range(start_window.clone());
                let duration = self.duration.sample(rng) + self.params.min_duration;
                let stop_time = (start_time + duration).min(stop_limit);

                let destination = rng.random_range(0..node_count);
                let source = self.draw_source(destination, node_count, rng)?;
                let dest_port = rng.random_range(self.params.ports());

                debug!(
                    "flow #{i}: node {source} -> node {destination}:{dest_port}, {:.3}s..{:.3}s",
                    start_time, stop_time
                );
                Ok(TrafficFlow {
                    source,
                    destination,
                    start_time,
                    stop_time,
                    dest_port,
                })
            })
            .collect()
    }

    fn draw_source<R: Rng>(
        &self,
        destination: NodeIndex,
        node_count: usize,
        rng: &mut R,
    ) -> Result<NodeIndex> {
        for _ in 0..=self.params.max_redraws {
            let source = rng.random_range(0..node_count);
            if source != destination {
                return Ok(source);
            }
        }
        Err(MeshLabError::config(format!(
            "no source distinct from node {destination} after {} re-draws",
            self.params.max_redraws
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::TrafficGenerator;
    use mesh_lab_abstract::{MeshLabError, TrafficParams};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const TOTAL: f64 = 240.0;

    fn generator() -> TrafficGenerator {
        TrafficGenerator::new(TrafficParams::default()).unwrap()
    }

    #[test]
    fn one_flow_per_node_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let params = TrafficParams::default();
        for _ in 0..200 {
            let flows = generator().generate(25, TOTAL, &mut rng).unwrap();
            assert_eq!(flows.len(), 25);
            for flow in &flows {
                assert_ne!(flow.source, flow.destination);
                assert!(flow.source < 25 && flow.destination < 25);
                assert!(flow.start_time >= params.earliest_start);
                assert!(flow.start_time <= TOTAL - params.tail_margin);
                assert!(flow.start_time < flow.stop_time);
                assert!(flow.stop_time <= TOTAL - params.end_margin);
                assert!(flow.duration() > 0.0);
                assert!(params.ports().contains(&flow.dest_port));
            }
        }
    }

    #[test]
    fn two_node_grid_always_pairs_the_nodes() {
        let mut rng = StdRng::seed_from_u64(11);
        let flows = generator().generate(2, TOTAL, &mut rng).unwrap();
        assert_eq!(flows.len(), 2);
        for flow in flows {
            assert_eq!(flow.source + flow.destination, 1);
        }
    }

    #[test]
    fn node_marginals_are_close_to_uniform() {
        let nodes = 5;
        let rounds = 4_000;
        let mut rng = StdRng::seed_from_u64(2024);
        let mut as_source = vec![0u32; nodes];
        let mut as_destination = vec![0u32; nodes];
        for _ in 0..rounds {
            for flow in generator().generate(nodes, TOTAL, &mut rng).unwrap() {
                as_source[flow.source] += 1;
                as_destination[flow.destination] += 1;
            }
        }
        let expected = f64::from(rounds as u32);
        for count in as_source.iter().chain(as_destination.iter()) {
            let deviation = (f64::from(*count) - expected).abs() / expected;
            assert!(deviation < 0.1, "count {count} too far from {expected}");
        }
    }

    #[test]
    fn mean_duration_follows_the_exponential() {
        // Long run so the stop clamp rarely bites.
        let total = 100_000.0;
        let mut rng = StdRng::seed_from_u64(3);
        let mut flows = Vec::new();
        for _ in 0..50 {
            flows.extend(generator().generate(200, total, &mut rng).unwrap());
        }
        let mean = flows.iter().map(|f| f.duration()).sum::<f64>() / flows.len() as f64;
        assert!((mean - 31.0).abs() < 2.0, "mean duration {mean}");
    }

    #[test]
    fn same_seed_same_matrix() {
        let a = generator()
            .generate(9, TOTAL, &mut StdRng::seed_from_u64(99))
            .unwrap();
        let b = generator()
            .generate(9, TOTAL, &mut StdRng::seed_from_u64(99))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn degenerate_inputs_are_configuration_errors() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            generator().generate(1, TOTAL, &mut rng),
            Err(MeshLabError::Configuration(_))
        ));
        assert!(matches!(
            generator().generate(0, TOTAL, &mut rng),
            Err(MeshLabError::Configuration(_))
        ));
        assert!(matches!(
            generator().generate(25, 60.0, &mut rng),
            Err(MeshLabError::Configuration(_))
        ));
    }

    #[test]
    fn unusable_mean_is_rejected_up_front() {
        let params = TrafficParams {
            mean_duration: f64::NAN,
            ..Default::default()
        };
        assert!(TrafficGenerator::new(params).is_err());
    }

    #[test]
    fn exhausted_redraws_are_a_configuration_error() {
        let params = TrafficParams {
            max_redraws: 1,
            ..Default::default()
        };
        let generator = TrafficGenerator::new(params).unwrap();
        // Two draws per flow on a 2-node grid collide a quarter of the time.
        let failures: Vec<_> = (0..64)
            .filter_map(|seed| {
                generator
                    .generate(2, TOTAL, &mut StdRng::seed_from_u64(seed))
                    .err()
            })
            .collect();
        assert!(!failures.is_empty());
        for err in failures {
            match err {
                MeshLabError::Configuration(msg) => assert!(msg.contains("re-draws"), "{msg}"),
                other => panic!("unexpected error {other:?}"),
            }
        }
    }
}
