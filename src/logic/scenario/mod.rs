//! Scenario Injector - Adversarial sensor stream
//!
//! Base readings are uniform in [20, 100]; perturbations are applied in the
//! configured order on every frame. The default set is increase-values,
//! sensor-failure and noise-injection.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::logic::sensors::{SensorFrame, SENSOR_COUNT};

/// Reading emitted by a failed sensor
pub const FAILURE_VALUE: f64 = -999.0;

/// One frame per orchestrator tick
pub trait ScenarioSource: Send {
    fn next_frame(&mut self) -> SensorFrame;
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perturbation {
    /// p 0.05 per sensor: value × U(1.5, 3)
    IncreaseValues,
    /// p 0.10 per sensor: value = -999
    SensorFailure,
    /// every sensor: value + U(-5, 5)
    NoiseInjection,
    /// p 0.05 per sensor: value = one previously emitted reading
    ReplayAttack,
    /// p 0.05 per sensor: value + one shared offset U(-10, 10)
    DataPoisoning,
    /// p `dropout_probability` per sensor: slot absent
    Dropout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// `None` ⇒ seeded from entropy
    pub seed: Option<u64>,
    pub perturbations: Vec<Perturbation>,
    pub base_min: f64,
    pub base_max: f64,
    pub dropout_probability: f64,
    /// Emitted readings remembered for replay
    pub replay_memory: usize,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: None,
            perturbations: vec![
                Perturbation::IncreaseValues,
                Perturbation::SensorFailure,
                Perturbation::NoiseInjection,
            ],
            base_min: 20.0,
            base_max: 100.0,
            dropout_probability: 0.02,
            replay_memory: 256,
        }
    }
}

// ============================================================================
// SIMULATED SCENARIO
// ============================================================================

pub struct SimulatedScenario {
    config: ScenarioConfig,
    rng: StdRng,
    emitted: VecDeque<f64>,
    frames: u64,
}

impl SimulatedScenario {
    pub fn new(config: ScenarioConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            emitted: VecDeque::with_capacity(config.replay_memory),
            config,
            rng,
            frames: 0,
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames
    }

    /// Raw values for the next frame (`None` = dropped slot)
    pub fn next_values(&mut self) -> [Option<f64>; SENSOR_COUNT] {
        let (lo, hi) = if self.config.base_min < self.config.base_max {
            (self.config.base_min, self.config.base_max)
        } else {
            (20.0, 100.0)
        };

        let mut values: [Option<f64>; SENSOR_COUNT] = [None; SENSOR_COUNT];
        for slot in values.iter_mut() {
            *slot = Some(self.rng.gen_range(lo..hi));
        }

        let perturbations = self.config.perturbations.clone();
        for perturbation in perturbations {
            self.apply(perturbation, &mut values);
        }

        for value in values.iter().flatten() {
            if self.emitted.len() >= self.config.replay_memory.max(1) {
                self.emitted.pop_front();
            }
            self.emitted.push_back(*value);
        }
        self.frames += 1;
        values
    }

    fn apply(&mut self, perturbation: Perturbation, values: &mut [Option<f64>; SENSOR_COUNT]) {
        match perturbation {
            Perturbation::IncreaseValues => {
                for value in values.iter_mut().flatten() {
                    if self.rng.gen_bool(0.05) {
                        *value *= self.rng.gen_range(1.5..3.0);
                    }
                }
            }
            Perturbation::SensorFailure => {
                for value in values.iter_mut().flatten() {
                    if self.rng.gen_bool(0.10) {
                        *value = FAILURE_VALUE;
                    }
                }
            }
            Perturbation::NoiseInjection => {
                for value in values.iter_mut().flatten() {
                    *value += self.rng.gen_range(-5.0..5.0);
                }
            }
            Perturbation::ReplayAttack => {
                let Some(replay) = self.emitted.make_contiguous().choose(&mut self.rng).copied() else {
                    return;
                };
                for value in values.iter_mut().flatten() {
                    if self.rng.gen_bool(0.05) {
                        *value = replay;
                    }
                }
            }
            Perturbation::DataPoisoning => {
                let offset = self.rng.gen_range(-10.0..10.0);
                for value in values.iter_mut().flatten() {
                    if self.rng.gen_bool(0.05) {
                        *value += offset;
                    }
                }
            }
            Perturbation::Dropout => {
                let p = self.config.dropout_probability.clamp(0.0, 1.0);
                for slot in values.iter_mut() {
                    if self.rng.gen_bool(p) {
                        *slot = None;
                    }
                }
            }
        }
    }
}

impl ScenarioSource for SimulatedScenario {
    fn next_frame(&mut self) -> SensorFrame {
        SensorFrame::from_values(self.next_values())
    }
}

// ============================================================================
// SCRIPTED SCENARIO
// ============================================================================

/// Replays a fixed list of frames, cycling when exhausted
pub struct ScriptedScenario {
    frames: Vec<[Option<f64>; SENSOR_COUNT]>,
    position: usize,
}

impl ScriptedScenario {
    pub fn new(frames: Vec<[Option<f64>; SENSOR_COUNT]>) -> Self {
        Self { frames, position: 0 }
    }
}

impl ScenarioSource for ScriptedScenario {
    fn next_frame(&mut self) -> SensorFrame {
        if self.frames.is_empty() {
            return SensorFrame::from_values([None; SENSOR_COUNT]);
        }
        let values = self.frames[self.position % self.frames.len()];
        self.position += 1;
        SensorFrame::from_values(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(perturbations: Vec<Perturbation>) -> SimulatedScenario {
        SimulatedScenario::new(ScenarioConfig {
            seed: Some(11),
            perturbations,
            ..Default::default()
        })
    }

    #[test]
    fn test_base_values_in_range() {
        let mut scenario = seeded(vec![]);
        for _ in 0..200 {
            for value in scenario.next_values() {
                let v = value.unwrap();
                assert!((20.0..100.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = seeded(ScenarioConfig::default().perturbations);
        let mut b = seeded(ScenarioConfig::default().perturbations);
        for _ in 0..50 {
            assert_eq!(a.next_values(), b.next_values());
        }
    }

    #[test]
    fn test_sensor_failure_emits_failure_value() {
        let mut scenario = seeded(vec![Perturbation::SensorFailure]);
        let failures = (0..500)
            .flat_map(|_| scenario.next_values())
            .filter(|v| *v == Some(FAILURE_VALUE))
            .count();
        // 4000 draws at p 0.1
        assert!(failures > 250 && failures < 550, "failures={}", failures);
    }

    #[test]
    fn test_noise_stays_within_band() {
        let mut scenario = seeded(vec![Perturbation::NoiseInjection]);
        for _ in 0..200 {
            for value in scenario.next_values() {
                let v = value.unwrap();
                assert!((15.0..105.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_dropout_produces_absent_slots() {
        let mut scenario = SimulatedScenario::new(ScenarioConfig {
            seed: Some(3),
            perturbations: vec![Perturbation::Dropout],
            dropout_probability: 1.0,
            ..Default::default()
        });
        assert_eq!(scenario.next_frame().present_count(), 0);
    }

    #[test]
    fn test_replay_uses_previous_values() {
        let mut scenario = seeded(vec![Perturbation::ReplayAttack]);
        let first = scenario.next_values();
        let seen: Vec<f64> = first.iter().flatten().copied().collect();
        // no history on the first frame: values untouched and in range
        assert!(seen.iter().all(|v| (20.0..100.0).contains(v)));
        assert_eq!(scenario.frames_emitted(), 1);
    }

    #[test]
    fn test_scripted_cycles() {
        let mut scripted = ScriptedScenario::new(vec![[Some(1.0); SENSOR_COUNT], [Some(2.0); SENSOR_COUNT]]);
        assert_eq!(scripted.next_frame().value(crate::logic::sensors::SensorId::Speed), Some(1.0));
        assert_eq!(scripted.next_frame().value(crate::logic::sensors::SensorId::Speed), Some(2.0));
        assert_eq!(scripted.next_frame().value(crate::logic::sensors::SensorId::Speed), Some(1.0));
    }
}
