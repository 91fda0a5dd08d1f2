use crate::generator::frame::{encode, MeterKind, FRAME_LEN};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Configuration for generating synthetic `rtl_tcp` sample blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Bytes written to the client per tick.
    pub chunk_size: usize,
    /// Simulated meters, each with its own endpoint id.
    pub meters: usize,
    /// Chance that a block carries a transmission.
    pub transmit_probability: f64,
    /// Peak deviation of the noise floor around the 127 midpoint.
    pub noise: u8,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16_384,
            meters: 6,
            transmit_probability: 0.25,
            noise: 12,
            seed: 0,
        }
    }
}

struct SimulatedMeter {
    kind: MeterKind,
    endpoint_id: u32,
    consumption: u32,
}

/// Produces noise blocks with occasional meter frames embedded.
pub struct BlockGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    meters: Vec<SimulatedMeter>,
}

impl BlockGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let meters = (0..config.meters.max(1))
            .map(|index| SimulatedMeter {
                kind: MeterKind::ALL[index % MeterKind::ALL.len()],
                endpoint_id: rng.gen_range(10_000_000..99_999_999),
                consumption: rng.gen_range(1_000..500_000),
            })
            .collect();
        Self { config, rng, meters }
    }

    /// Overwrites `block` with the next stretch of samples.
    ///
    /// Returns the endpoint id of the meter that transmitted, if any.
    pub fn fill(&mut self, block: &mut [u8]) -> Option<u32> {
        let noise = self.config.noise.min(100);
        for byte in block.iter_mut() {
            *byte = 127 - noise + self.rng.gen_range(0..=noise * 2);
        }

        let probability = self.config.transmit_probability.clamp(0.0, 1.0);
        if block.len() < FRAME_LEN || !self.rng.gen_bool(probability) {
            return None;
        }

        let index = self.rng.gen_range(0..self.meters.len());
        let meter = &mut self.meters[index];
        meter.consumption = meter.consumption.wrapping_add(self.rng.gen_range(1..20));
        let frame = encode(meter.kind, meter.endpoint_id, meter.consumption);
        let offset = self.rng.gen_range(0..=block.len() - FRAME_LEN);
        block[offset..offset + FRAME_LEN].copy_from_slice(&frame);
        Some(meter.endpoint_id)
    }
}
