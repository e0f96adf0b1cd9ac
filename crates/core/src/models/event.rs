//! Discrete play-by-play events and their flag sets.
//!
//! Each variant carries a fixed set of named boolean flags. Selecting a flag
//! through `set` applies the exclusion rules for that variant; `validate`
//! rejects flag sets that break them so a bad record is never appended.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Gender, Side, Winner};

/// Flag combination that breaks an exclusion rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{variant} flags conflict: {reason}")]
pub struct FlagConflict {
    /// Event variant name.
    pub variant: &'static str,
    /// Which rule was broken.
    pub reason: &'static str,
}

impl FlagConflict {
    fn new(variant: &'static str, reason: &'static str) -> Self {
        Self { variant, reason }
    }
}

/// Flags recorded on a completed throw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThrowFlags {
    pub huck: bool,
    pub breakmark: bool,
    pub hammer: bool,
    pub dump: bool,
    pub layout: bool,
    pub sky: bool,
    pub score: bool,
}

/// Flags recorded on a turnover by our offense.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TurnoverFlags {
    pub throwaway: bool,
    pub huck: bool,
    pub receiver_error: bool,
    pub good_defense: bool,
    pub stall: bool,
}

/// Individually selectable turnover flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnoverFlag {
    Throwaway,
    Huck,
    ReceiverError,
    GoodDefense,
    Stall,
}

impl TurnoverFlags {
    /// Toggle a flag, clearing whatever it excludes when switched on.
    pub fn set(&mut self, flag: TurnoverFlag, on: bool) {
        if on {
            match flag {
                TurnoverFlag::Throwaway => {
                    self.receiver_error = false;
                    self.stall = false;
                }
                TurnoverFlag::ReceiverError => {
                    self.throwaway = false;
                    self.stall = false;
                }
                TurnoverFlag::Stall => {
                    self.throwaway = false;
                    self.receiver_error = false;
                    self.huck = false;
                }
                TurnoverFlag::Huck => self.stall = false,
                TurnoverFlag::GoodDefense => {}
            }
        }
        match flag {
            TurnoverFlag::Throwaway => self.throwaway = on,
            TurnoverFlag::Huck => self.huck = on,
            TurnoverFlag::ReceiverError => self.receiver_error = on,
            TurnoverFlag::GoodDefense => self.good_defense = on,
            TurnoverFlag::Stall => self.stall = on,
        }
    }

    pub fn validate(&self) -> Result<(), FlagConflict> {
        let causes = [self.throwaway, self.receiver_error, self.stall]
            .into_iter()
            .filter(|flag| *flag)
            .count();
        if causes > 1 {
            return Err(FlagConflict::new(
                "Turnover",
                "throwaway, drop and stall are exclusive causes",
            ));
        }
        if self.huck && self.stall {
            return Err(FlagConflict::new("Turnover", "a stall cannot be a huck"));
        }
        Ok(())
    }
}

/// Flags recorded on a defensive play.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefenseFlags {
    pub block: bool,
    pub interception: bool,
    pub callahan: bool,
    pub layout: bool,
    pub sky: bool,
    pub stall: bool,
    pub unforced_error: bool,
}

/// Individually selectable defense flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefenseFlag {
    Block,
    Interception,
    Callahan,
    Layout,
    Sky,
    Stall,
    UnforcedError,
}

impl DefenseFlags {
    /// Toggle a flag, clearing whatever it excludes when switched on.
    pub fn set(&mut self, flag: DefenseFlag, on: bool) {
        if on {
            match flag {
                DefenseFlag::Stall | DefenseFlag::UnforcedError => *self = Self::default(),
                DefenseFlag::Block | DefenseFlag::Interception | DefenseFlag::Callahan => {
                    self.block = false;
                    self.interception = false;
                    self.callahan = false;
                    self.stall = false;
                    self.unforced_error = false;
                }
                DefenseFlag::Layout | DefenseFlag::Sky => {
                    self.stall = false;
                    self.unforced_error = false;
                }
            }
        }
        match flag {
            DefenseFlag::Block => self.block = on,
            DefenseFlag::Interception => self.interception = on,
            DefenseFlag::Callahan => self.callahan = on,
            DefenseFlag::Layout => self.layout = on,
            DefenseFlag::Sky => self.sky = on,
            DefenseFlag::Stall => self.stall = on,
            DefenseFlag::UnforcedError => self.unforced_error = on,
        }
    }

    fn has_primary(&self) -> bool {
        self.block || self.interception || self.callahan
    }

    pub fn validate(&self) -> Result<(), FlagConflict> {
        let others = [
            self.block,
            self.interception,
            self.callahan,
            self.layout,
            self.sky,
        ]
        .into_iter()
        .any(|flag| flag);
        if self.stall && (self.unforced_error || others) {
            return Err(FlagConflict::new("Defense", "a forced stall stands alone"));
        }
        if self.unforced_error && others {
            return Err(FlagConflict::new("Defense", "an unforced error stands alone"));
        }
        let primaries = [self.block, self.interception, self.callahan]
            .into_iter()
            .filter(|flag| *flag)
            .count();
        if primaries > 1 {
            return Err(FlagConflict::new(
                "Defense",
                "block, interception and Callahan are exclusive",
            ));
        }
        if (self.layout || self.sky) && !self.has_primary() {
            return Err(FlagConflict::new(
                "Defense",
                "layout and sky need a block, interception or Callahan",
            ));
        }
        Ok(())
    }
}

/// How well a pull landed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullQuality {
    Good,
    #[default]
    Ok,
    Poor,
    Brick,
}

impl PullQuality {
    fn label(self) -> &'static str {
        match self {
            PullQuality::Good => "good",
            PullQuality::Ok => "ok",
            PullQuality::Poor => "poor",
            PullQuality::Brick => "brick",
        }
    }
}

/// Throw style of a pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullFlags {
    pub flick: bool,
    pub roller: bool,
    pub io: bool,
    pub oi: bool,
}

/// Individually selectable pull flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullFlag {
    Flick,
    Roller,
    Io,
    Oi,
}

impl PullFlags {
    pub fn set(&mut self, flag: PullFlag, on: bool) {
        match flag {
            PullFlag::Flick => self.flick = on,
            PullFlag::Roller => self.roller = on,
            PullFlag::Io => {
                self.io = on;
                if on {
                    self.oi = false;
                }
            }
            PullFlag::Oi => {
                self.oi = on;
                if on {
                    self.io = false;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), FlagConflict> {
        if self.io && self.oi {
            return Err(FlagConflict::new("Pull", "inside-out and outside-in are exclusive"));
        }
        Ok(())
    }
}

/// Calls made against our offense.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViolationFlags {
    pub offensive_foul: bool,
    pub strip: bool,
    pub pick: bool,
    pub travel: bool,
    pub contested_foul: bool,
    pub double_team: bool,
}

/// Game-level stoppages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OtherFlags {
    pub timeout: bool,
    pub injury_sub: bool,
    pub timecap: bool,
    pub switch_sides: bool,
    pub halftime: bool,
}

/// One recorded action within a possession.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Completed pass, possibly for a goal.
    Throw {
        thrower: String,
        receiver: String,
        #[serde(default)]
        flags: ThrowFlags,
    },
    /// Our offense lost the disc.
    Turnover {
        #[serde(default)]
        thrower: Option<String>,
        #[serde(default)]
        receiver: Option<String>,
        #[serde(default)]
        flags: TurnoverFlags,
    },
    /// Our defense won the disc.
    Defense {
        #[serde(default)]
        defender: Option<String>,
        #[serde(default)]
        flags: DefenseFlags,
    },
    /// We pulled to start a point on defense.
    Pull {
        #[serde(default)]
        puller: Option<String>,
        #[serde(default, rename = "pullerGender")]
        puller_gender: Option<Gender>,
        #[serde(default)]
        quality: PullQuality,
        #[serde(default)]
        flags: PullFlags,
    },
    /// A call against our offense.
    Violation {
        #[serde(default)]
        thrower: Option<String>,
        #[serde(default)]
        receiver: Option<String>,
        #[serde(default)]
        flags: ViolationFlags,
    },
    /// Timeouts, substitutions and side switches.
    Other {
        #[serde(default)]
        flags: OtherFlags,
    },
}

const UNKNOWN: &str = "Unknown player";

fn name_or_unknown(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or(UNKNOWN)
}

impl Event {
    /// Variant name as used in serialized records.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Throw { .. } => "Throw",
            Event::Turnover { .. } => "Turnover",
            Event::Defense { .. } => "Defense",
            Event::Pull { .. } => "Pull",
            Event::Violation { .. } => "Violation",
            Event::Other { .. } => "Other",
        }
    }

    /// Whether the event is play on the field. Game-level markers such as
    /// timeouts leave a point's clock alone.
    pub fn starts_clock(&self) -> bool {
        !matches!(self, Event::Other { .. })
    }

    /// Check the flag set against its exclusion rules.
    pub fn validate(&self) -> Result<(), FlagConflict> {
        match self {
            Event::Turnover { flags, .. } => flags.validate(),
            Event::Defense { flags, .. } => flags.validate(),
            Event::Pull { flags, .. } => flags.validate(),
            Event::Throw { .. } | Event::Violation { .. } | Event::Other { .. } => Ok(()),
        }
    }

    /// Side the possession must be on for this event, `None` to keep the open one.
    pub fn required_side(&self) -> Option<Side> {
        match self {
            Event::Throw { .. } | Event::Turnover { .. } | Event::Violation { .. } => {
                Some(Side::Offense)
            }
            Event::Defense { .. } | Event::Pull { .. } => Some(Side::Defense),
            Event::Other { .. } => None,
        }
    }

    /// Side of the possession that follows this event, when it changes hands.
    pub fn next_side(&self) -> Option<Side> {
        match self {
            Event::Turnover { .. } => Some(Side::Defense),
            Event::Defense { flags, .. } if !flags.callahan => Some(Side::Offense),
            _ => None,
        }
    }

    /// Point winner when this event ends the point.
    pub fn point_winner(&self) -> Option<Winner> {
        match self {
            Event::Throw { flags, .. } if flags.score => Some(Winner::Team),
            Event::Defense { flags, .. } if flags.callahan => Some(Winner::Team),
            _ => None,
        }
    }

    /// Marker consumed by the starting-position fold.
    pub fn is_side_switch(&self) -> bool {
        matches!(self, Event::Other { flags } if flags.switch_sides)
    }

    /// Human-readable, deterministic description of the event.
    pub fn summarize(&self) -> String {
        match self {
            Event::Throw {
                thrower,
                receiver,
                flags,
            } => {
                let verb = if flags.huck { "hucks" } else { "throws" };
                let mut text = format!("{thrower} {verb} to {receiver}");
                let modifiers = [
                    (flags.breakmark, "break mark"),
                    (flags.hammer, "hammer"),
                    (flags.dump, "dump"),
                    (flags.layout, "layout catch"),
                    (flags.sky, "sky catch"),
                ];
                append_modifiers(&mut text, &modifiers);
                if flags.score {
                    text.push_str(&format!(". {receiver} scores!"));
                }
                text
            }
            Event::Turnover {
                thrower,
                receiver,
                flags,
            } => {
                let thrower = name_or_unknown(thrower);
                let mut text = if flags.throwaway {
                    format!("{thrower} throws it away")
                } else if flags.receiver_error {
                    format!("{} drops the pass from {thrower}", name_or_unknown(receiver))
                } else if flags.stall {
                    format!("{thrower} is stalled")
                } else {
                    format!("Turnover by {thrower}")
                };
                append_modifiers(
                    &mut text,
                    &[(flags.huck, "huck"), (flags.good_defense, "good defense")],
                );
                text
            }
            Event::Defense { defender, flags } => {
                let defender = name_or_unknown(defender);
                let mut text = if flags.callahan {
                    format!("Callahan by {defender}")
                } else if flags.interception {
                    format!("{defender} intercepts")
                } else if flags.block {
                    format!("{defender} blocks the pass")
                } else if flags.stall {
                    "Defense forces a stall".to_string()
                } else if flags.unforced_error {
                    "Opponent turnover (unforced error)".to_string()
                } else {
                    format!("Defensive turnover by {defender}")
                };
                append_modifiers(&mut text, &[(flags.layout, "layout"), (flags.sky, "sky")]);
                if flags.callahan {
                    text.push_str(&format!(". {defender} scores!"));
                }
                text
            }
            Event::Pull {
                puller,
                quality,
                flags,
                ..
            } => {
                let mut text = format!("{} pulls ({})", name_or_unknown(puller), quality.label());
                append_modifiers(
                    &mut text,
                    &[
                        (flags.flick, "flick"),
                        (flags.roller, "roller"),
                        (flags.io, "inside-out"),
                        (flags.oi, "outside-in"),
                    ],
                );
                text
            }
            Event::Violation {
                thrower,
                receiver,
                flags,
            } => {
                let calls: Vec<&str> = [
                    (flags.offensive_foul, "offensive foul"),
                    (flags.strip, "strip"),
                    (flags.pick, "pick"),
                    (flags.travel, "travel"),
                    (flags.contested_foul, "contested foul"),
                    (flags.double_team, "double team"),
                ]
                .into_iter()
                .filter_map(|(on, label)| on.then_some(label))
                .collect();
                let calls = if calls.is_empty() {
                    "unspecified".to_string()
                } else {
                    calls.join(", ")
                };
                match (thrower, receiver) {
                    (Some(thrower), Some(receiver)) => {
                        format!("Violation: {calls} ({thrower} to {receiver})")
                    }
                    (Some(player), None) | (None, Some(player)) => {
                        format!("Violation: {calls} ({player})")
                    }
                    (None, None) => format!("Violation: {calls}"),
                }
            }
            Event::Other { flags } => {
                let labels: Vec<&str> = [
                    (flags.timeout, "Timeout"),
                    (flags.injury_sub, "Injury sub"),
                    (flags.timecap, "Time cap"),
                    (flags.switch_sides, "Switch sides"),
                    (flags.halftime, "Halftime"),
                ]
                .into_iter()
                .filter_map(|(on, label)| on.then_some(label))
                .collect();
                if labels.is_empty() {
                    "Stoppage".to_string()
                } else {
                    labels.join(", ")
                }
            }
        }
    }
}

fn append_modifiers(text: &mut String, modifiers: &[(bool, &str)]) {
    let active: Vec<&str> = modifiers
        .iter()
        .filter_map(|(on, label)| on.then_some(*label))
        .collect();
    if !active.is_empty() {
        text.push_str(&format!(" ({})", active.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turnover_primary_causes_replace_each_other() {
        let mut flags = TurnoverFlags::default();
        flags.set(TurnoverFlag::Throwaway, true);
        flags.set(TurnoverFlag::ReceiverError, true);
        assert!(!flags.throwaway);
        assert!(flags.receiver_error);

        flags.set(TurnoverFlag::Stall, true);
        assert!(!flags.receiver_error);
        assert!(flags.stall);
        assert!(flags.validate().is_ok());
    }

    #[test]
    fn turnover_huck_and_stall_exclude_each_other() {
        let mut flags = TurnoverFlags::default();
        flags.set(TurnoverFlag::Huck, true);
        flags.set(TurnoverFlag::Stall, true);
        assert!(!flags.huck);

        flags.set(TurnoverFlag::Huck, true);
        assert!(!flags.stall);
        assert!(flags.huck);

        let bad = TurnoverFlags {
            huck: true,
            stall: true,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn defense_stall_clears_everything_else() {
        let mut flags = DefenseFlags::default();
        flags.set(DefenseFlag::Block, true);
        flags.set(DefenseFlag::Layout, true);
        flags.set(DefenseFlag::Stall, true);
        assert_eq!(
            flags,
            DefenseFlags {
                stall: true,
                ..Default::default()
            }
        );

        flags.set(DefenseFlag::UnforcedError, true);
        assert!(!flags.stall);
        assert!(flags.unforced_error);
    }

    #[test]
    fn defense_primaries_are_exclusive_and_keep_modifiers() {
        let mut flags = DefenseFlags::default();
        flags.set(DefenseFlag::Interception, true);
        flags.set(DefenseFlag::Sky, true);
        flags.set(DefenseFlag::Callahan, true);
        assert!(!flags.interception);
        assert!(flags.callahan);
        assert!(flags.sky);
        assert!(flags.validate().is_ok());
    }

    #[test]
    fn defense_modifier_clears_stall_and_needs_a_primary() {
        let mut flags = DefenseFlags::default();
        flags.set(DefenseFlag::UnforcedError, true);
        flags.set(DefenseFlag::Layout, true);
        assert!(!flags.unforced_error);
        assert!(flags.layout);
        assert!(flags.validate().is_err());

        flags.set(DefenseFlag::Block, true);
        assert!(flags.validate().is_ok());
    }

    #[test]
    fn pull_directions_exclude_each_other() {
        let mut flags = PullFlags::default();
        flags.set(PullFlag::Io, true);
        flags.set(PullFlag::Oi, true);
        assert!(!flags.io);
        assert!(flags.oi);
    }

    #[test]
    fn scoring_summaries_mention_the_score() {
        let throw = Event::Throw {
            thrower: "Alex".into(),
            receiver: "Sam".into(),
            flags: ThrowFlags {
                score: true,
                huck: true,
                ..Default::default()
            },
        };
        assert_eq!(throw.summarize(), "Alex hucks to Sam. Sam scores!");
        assert_eq!(throw.summarize(), throw.clone().summarize());

        let callahan = Event::Defense {
            defender: Some("Jo".into()),
            flags: DefenseFlags {
                callahan: true,
                layout: true,
                ..Default::default()
            },
        };
        assert_eq!(callahan.summarize(), "Callahan by Jo (layout). Jo scores!");
    }

    #[test]
    fn non_scoring_summaries_are_stable() {
        let turnover = Event::Turnover {
            thrower: Some("Alex".into()),
            receiver: Some("Sam".into()),
            flags: TurnoverFlags {
                receiver_error: true,
                huck: true,
                ..Default::default()
            },
        };
        assert_eq!(turnover.summarize(), "Sam drops the pass from Alex (huck)");
        assert!(!turnover.summarize().contains("scores!"));

        let other = Event::Other {
            flags: OtherFlags {
                timeout: true,
                switch_sides: true,
                ..Default::default()
            },
        };
        assert_eq!(other.summarize(), "Timeout, Switch sides");
    }

    #[test]
    fn event_record_carries_type_tag_and_flags() {
        let pull = Event::Pull {
            puller: Some("Kai".into()),
            puller_gender: Some(Gender::Fmp),
            quality: PullQuality::Good,
            flags: PullFlags {
                roller: true,
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&pull).unwrap();
        assert_eq!(value["type"], "Pull");
        assert_eq!(value["pullerGender"], "FMP");
        assert_eq!(value["flags"]["roller"], true);
        assert_eq!(value["flags"]["io"], false);

        let decoded: Event = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, pull);
    }

    #[test]
    fn side_rules_follow_possession_changes() {
        let turnover = Event::Turnover {
            thrower: None,
            receiver: None,
            flags: TurnoverFlags::default(),
        };
        assert_eq!(turnover.required_side(), Some(Side::Offense));
        assert_eq!(turnover.next_side(), Some(Side::Defense));

        let callahan = Event::Defense {
            defender: None,
            flags: DefenseFlags {
                callahan: true,
                ..Default::default()
            },
        };
        assert_eq!(callahan.next_side(), None);
        assert_eq!(callahan.point_winner(), Some(Winner::Team));
    }
}
