// Variant — The closed set of update strategies a StatefulOptimizer can run
//
// Each variant is a unit struct implementing UpdateStrategy in its own
// module. The enum dispatches by exhaustive match, so adding a variant is a
// compile error everywhere it has not been handled yet.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::adamw::AdamW;
use crate::config::GroupConfig;
use crate::error::{OptimError, Result};
use crate::laprop::LaProp;
use crate::optimizer::{ActiveBatch, Direction, GroupProgress, StepScalars, UpdateStrategy};
use crate::param::Param;
use crate::schedule_free::ScheduleFreeAdamW;
use crate::state::ParamState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    LaProp,
    AdamW,
    ScheduleFreeAdamW,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::LaProp, Variant::AdamW, Variant::ScheduleFreeAdamW];

    fn strategy(&self) -> &'static dyn UpdateStrategy {
        match self {
            Variant::LaProp => &LaProp,
            Variant::AdamW => &AdamW,
            Variant::ScheduleFreeAdamW => &ScheduleFreeAdamW,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = OptimError;

    /// Accepts the checkpoint name (`ForeachLaProp`) or the short one
    /// (`LaProp`), ignoring case.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "foreachlaprop" | "laprop" => Ok(Variant::LaProp),
            "foreachadamw" | "adamw" => Ok(Variant::AdamW),
            "foreachsfadamw" | "sfadamw" | "schedulefreeadamw" => Ok(Variant::ScheduleFreeAdamW),
            _ => Err(OptimError::UnknownVariant(s.to_string())),
        }
    }
}

impl UpdateStrategy for Variant {
    fn name(&self) -> &'static str {
        self.strategy().name()
    }

    fn prepare_state(&self, config: &GroupConfig, param: &Param, state: &mut ParamState) {
        self.strategy().prepare_state(config, param, state)
    }

    fn schedule(&self, config: &GroupConfig, progress: &GroupProgress) -> StepScalars {
        self.strategy().schedule(config, progress)
    }

    fn compute_direction(
        &self,
        config: &GroupConfig,
        scalars: &StepScalars,
        batch: &mut ActiveBatch<'_>,
    ) -> Result<Direction> {
        self.strategy().compute_direction(config, scalars, batch)
    }

    fn consume(
        &self,
        config: &GroupConfig,
        scalars: &StepScalars,
        batch: &mut ActiveBatch<'_>,
        direction: Direction,
    ) -> Result<()> {
        self.strategy().consume(config, scalars, batch, direction)
    }

    fn advance(&self, progress: &mut GroupProgress, scalars: &StepScalars) {
        self.strategy().advance(progress, scalars)
    }

    fn transition(&self, config: &GroupConfig, param: &Param, state: &ParamState, to_train: bool) {
        self.strategy().transition(config, param, state, to_train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_and_short_names() {
        assert_eq!("ForeachLaProp".parse::<Variant>().unwrap(), Variant::LaProp);
        assert_eq!("laprop".parse::<Variant>().unwrap(), Variant::LaProp);
        assert_eq!("ADAMW".parse::<Variant>().unwrap(), Variant::AdamW);
        assert_eq!(
            "ForeachSFAdamW".parse::<Variant>().unwrap(),
            Variant::ScheduleFreeAdamW
        );
        assert!(matches!(
            "PrecondScheduleForeachSOAP".parse::<Variant>(),
            Err(OptimError::UnknownVariant(_))
        ));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for v in Variant::ALL {
            assert_eq!(v.to_string().parse::<Variant>().unwrap(), v);
        }
    }
}
