use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Simulation steps each action is held for (60 ms at the 10 ms step).
pub const ACTION_REPEAT: usize = 6;
/// Magnitude of every muscle command.
pub const MUSCLE_FORCE: f32 = 9000.0;
pub const ACTUATOR_COUNT: usize = 4;

/// One row of force commands, indexed by [`Actuator::index`].
pub type ForceRow = [f32; ACTUATOR_COUNT];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actuator {
    ThighLeft,
    ThighRight,
    CalfLeft,
    CalfRight,
}

impl Actuator {
    pub const ALL: [Actuator; ACTUATOR_COUNT] = [
        Actuator::ThighLeft,
        Actuator::ThighRight,
        Actuator::CalfLeft,
        Actuator::CalfRight,
    ];

    pub fn index(self) -> usize {
        match self {
            Actuator::ThighLeft => 0,
            Actuator::ThighRight => 1,
            Actuator::CalfLeft => 2,
            Actuator::CalfRight => 3,
        }
    }
}

/// A discrete leg-muscle command. Each one drives a single muscle pair in
/// opposition for [`ACTION_REPEAT`] steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    ThighsForward,
    ThighsBackward,
    CalvesForward,
    CalvesBackward,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::ThighsForward,
        Action::ThighsBackward,
        Action::CalvesForward,
        Action::CalvesBackward,
    ];

    pub fn code(self) -> u8 {
        match self {
            Action::ThighsForward => 0,
            Action::ThighsBackward => 1,
            Action::CalvesForward => 2,
            Action::CalvesBackward => 3,
        }
    }

    /// The two opposing commands this action issues every step.
    pub fn force_pair(self) -> [(Actuator, f32); 2] {
        match self {
            Action::ThighsForward => [
                (Actuator::ThighLeft, MUSCLE_FORCE),
                (Actuator::ThighRight, -MUSCLE_FORCE),
            ],
            Action::ThighsBackward => [
                (Actuator::ThighLeft, -MUSCLE_FORCE),
                (Actuator::ThighRight, MUSCLE_FORCE),
            ],
            Action::CalvesForward => [
                (Actuator::CalfLeft, MUSCLE_FORCE),
                (Actuator::CalfRight, -MUSCLE_FORCE),
            ],
            Action::CalvesBackward => [
                (Actuator::CalfLeft, -MUSCLE_FORCE),
                (Actuator::CalfRight, MUSCLE_FORCE),
            ],
        }
    }

    pub fn force_row(self) -> ForceRow {
        let mut row = [0.0; ACTUATOR_COUNT];
        for (actuator, command) in self.force_pair() {
            row[actuator.index()] = command;
        }
        row
    }
}

impl TryFrom<u8> for Action {
    type Error = SearchError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Action::ThighsForward),
            1 => Ok(Action::ThighsBackward),
            2 => Ok(Action::CalvesForward),
            3 => Ok(Action::CalvesBackward),
            other => Err(SearchError::InvalidAction(other)),
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action.code()
    }
}

/// Parses raw action codes, failing on the first unknown one.
pub fn parse_actions(codes: &[u8]) -> Result<Vec<Action>, SearchError> {
    codes.iter().map(|&code| Action::try_from(code)).collect()
}

pub fn action_codes(actions: &[Action]) -> Vec<u8> {
    actions.iter().map(|action| action.code()).collect()
}

/// Expands an action sequence into one force row per simulation step.
pub fn decode_force_schedule(actions: &[Action]) -> Vec<ForceRow> {
    let mut schedule = Vec::with_capacity(actions.len() * ACTION_REPEAT);
    for action in actions {
        let row = action.force_row();
        schedule.extend(std::iter::repeat_n(row, ACTION_REPEAT));
    }
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoded_schedule_sets_only_the_driven_pair() {
        for action in Action::ALL {
            let schedule = decode_force_schedule(&[action]);
            assert_eq!(schedule.len(), ACTION_REPEAT);

            let pair = action.force_pair();
            for row in &schedule {
                for actuator in Actuator::ALL {
                    let expected = pair
                        .iter()
                        .find(|(driven, _)| *driven == actuator)
                        .map(|(_, command)| *command)
                        .unwrap_or(0.0);
                    assert_eq!(row[actuator.index()], expected, "{action:?} {actuator:?}");
                }
                assert_eq!(row.iter().filter(|value| **value != 0.0).count(), 2);
            }
        }
    }

    #[test]
    fn schedule_rows_follow_action_order() {
        let actions = [Action::CalvesBackward, Action::ThighsForward];
        let schedule = decode_force_schedule(&actions);
        assert_eq!(schedule.len(), 2 * ACTION_REPEAT);
        assert_eq!(schedule[0], [0.0, 0.0, -MUSCLE_FORCE, MUSCLE_FORCE]);
        assert_eq!(schedule[ACTION_REPEAT - 1], schedule[0]);
        assert_eq!(
            schedule[ACTION_REPEAT],
            [MUSCLE_FORCE, -MUSCLE_FORCE, 0.0, 0.0]
        );
    }

    #[test]
    fn thigh_actions_are_mirror_images() {
        let forward = Action::ThighsForward.force_row();
        let backward = Action::ThighsBackward.force_row();
        for (a, b) in forward.iter().zip(backward.iter()) {
            assert_eq!(*a, -*b);
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(matches!(
            Action::try_from(4),
            Err(SearchError::InvalidAction(4))
        ));
        assert!(matches!(
            parse_actions(&[0, 1, 9, 2]),
            Err(SearchError::InvalidAction(9))
        ));
        let parsed = parse_actions(&[3, 2, 1, 0]).unwrap();
        assert_eq!(action_codes(&parsed), vec![3, 2, 1, 0]);
    }

    #[test]
    fn actions_serialize_as_codes() {
        let json = serde_json::to_string(&[Action::ThighsBackward, Action::CalvesForward]).unwrap();
        assert_eq!(json, "[1,2]");
        assert!(serde_json::from_str::<Vec<Action>>("[0,7]").is_err());
    }
}
