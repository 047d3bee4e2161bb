use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::Event;
use crate::{EngineErr, Result};

/// The progress of an `Engine`'s run.
///
/// `iteration` counts every processed batch since the run started, `epoch` counts the epochs
/// started so far. Both are 0 before the first run.
#[derive(Debug, Clone)]
pub struct State<O> {
    pub iteration: usize,
    pub epoch: usize,
    pub epoch_length: Option<usize>,
    pub max_epochs: Option<usize>,
    pub output: Option<O>,
    pub metrics: BTreeMap<String, f64>,
    pub seed: Option<u64>,
    pub times: HashMap<Event, Duration>,
}

impl<O> Default for State<O> {
    fn default() -> Self {
        Self {
            iteration: 0,
            epoch: 0,
            epoch_length: None,
            max_epochs: None,
            output: None,
            metrics: BTreeMap::new(),
            seed: None,
            times: HashMap::new(),
        }
    }
}

impl<O> State<O> {
    /// Whether the run reached either its epoch or its iteration budget.
    pub fn is_done(&self) -> bool {
        let Some(max_epochs) = self.max_epochs else {
            return false;
        };

        let done_count = self
            .epoch_length
            .is_some_and(|len| self.iteration >= len * max_epochs);

        done_count || self.epoch >= max_epochs
    }
}

/// A serializable checkpoint of the counters of an engine's state.
///
/// Exactly one of `iteration` and `epoch` must be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDict {
    pub epoch_length: usize,
    pub max_epochs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl StateDict {
    /// Resolves the `(iteration, epoch)` pair this checkpoint describes.
    ///
    /// # Returns
    /// An error if the checkpoint is inconsistent.
    pub fn counters(&self) -> Result<(usize, usize)> {
        if self.epoch_length == 0 {
            return Err(EngineErr::InvalidStateDict("epoch_length should be positive"));
        }

        match (self.iteration, self.epoch) {
            (Some(iteration), None) => Ok((iteration, iteration / self.epoch_length)),
            (None, Some(epoch)) => Ok((epoch * self.epoch_length, epoch)),
            (Some(_), Some(_)) => Err(EngineErr::InvalidStateDict(
                "only one of iteration or epoch should be given",
            )),
            (None, None) => Err(EngineErr::InvalidStateDict(
                "one of iteration or epoch is required",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_by_epochs_or_iterations() {
        let mut state = State::<()>::default();
        assert!(!state.is_done());

        state.max_epochs = Some(2);
        state.epoch_length = Some(5);
        state.iteration = 9;
        state.epoch = 1;
        assert!(!state.is_done());

        state.iteration = 10;
        assert!(state.is_done());

        state.iteration = 3;
        state.epoch = 2;
        assert!(state.is_done());
    }

    #[test]
    fn state_dict_counters() {
        let mut dict = StateDict {
            epoch_length: 4,
            max_epochs: 3,
            iteration: Some(9),
            epoch: None,
            seed: None,
        };
        assert_eq!(dict.counters().unwrap(), (9, 2));

        dict.iteration = None;
        dict.epoch = Some(2);
        assert_eq!(dict.counters().unwrap(), (8, 2));

        dict.iteration = Some(8);
        assert!(dict.counters().is_err());

        dict.iteration = None;
        dict.epoch = None;
        assert!(dict.counters().is_err());
    }

    #[test]
    fn state_dict_json_skips_missing_counters() {
        let dict = StateDict {
            epoch_length: 10,
            max_epochs: 5,
            iteration: Some(12),
            epoch: None,
            seed: Some(7),
        };

        let json = serde_json::to_string(&dict).unwrap();
        assert!(!json.contains("\"epoch\""));

        let back: StateDict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dict);
    }
}
