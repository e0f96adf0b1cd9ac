//! Line-oriented command grammar.
//!
//! Positional words are player names; words starting with `+` are flags.

use std::collections::BTreeSet;

use thiserror::Error;
use ultistats_core::{
    controller::Role,
    models::{
        DefenseFlags, LineType, OtherFlags, PullFlags, PullQuality, Side, ThrowFlags,
        TurnoverFlags, ViolationFlags,
    },
};

pub const HELP: &str = "\
start [o|d] [players..]        confirm the line and start a point
throw A B [+huck +break +hammer +dump +layout +sky +score]
goal SCORER [ASSISTER]         streamlined goal for us
they                           opponent scored
turn [thrower] [receiver] [+throwaway +huck +drop +gooddefense +stall]
d [defender] [+block +int +callahan +layout +sky +stall +unforced]
pull [puller] [+good|+ok|+poor|+brick] [+flick +roller +io +oi]
viol [thrower] [receiver] [+foul +strip +pick +travel +contested +double]
other [+timeout +injury +timecap +switch +halftime]
undo | pause | resume | feed | status
line o|d|od [players..]        stage the next line
linetype o|d|od                choose which staged line is used
claim|release|handoff pbp|line
accept ID | deny ID            answer a handoff request
versions | restore VERSION | end | help | quit";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {what}: `{value}`")]
    Invalid { what: &'static str, value: String },
    #[error("unexpected argument `{0}`")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start {
        side: Option<Side>,
        players: Option<BTreeSet<String>>,
    },
    Throw {
        thrower: String,
        receiver: String,
        flags: ThrowFlags,
    },
    Goal {
        scorer: String,
        assister: Option<String>,
    },
    TheyScore,
    Turnover {
        thrower: Option<String>,
        receiver: Option<String>,
        flags: TurnoverFlags,
    },
    Defense {
        defender: Option<String>,
        flags: DefenseFlags,
    },
    Pull {
        puller: Option<String>,
        quality: PullQuality,
        flags: PullFlags,
    },
    Violation {
        thrower: Option<String>,
        receiver: Option<String>,
        flags: ViolationFlags,
    },
    Other(OtherFlags),
    Undo,
    Pause,
    Resume,
    Line {
        line: LineType,
        players: BTreeSet<String>,
    },
    ActiveLine(LineType),
    Claim(Role),
    Release(Role),
    Handoff(Role),
    Respond {
        request_id: u64,
        accept: bool,
    },
    Feed,
    Status,
    Versions,
    Restore(String),
    EndGame,
    Help,
    Quit,
}

struct Args<'a> {
    names: Vec<&'a str>,
    flags: Vec<&'a str>,
}

impl<'a> Args<'a> {
    fn split(words: impl Iterator<Item = &'a str>) -> Self {
        let (flags, names): (Vec<_>, Vec<_>) = words.partition(|word| word.starts_with('+'));
        Self {
            names,
            flags: flags.into_iter().map(|flag| &flag[1..]).collect(),
        }
    }

    fn name(&self, index: usize) -> Option<String> {
        self.names.get(index).map(|name| name.to_string())
    }

    fn at_most(&self, count: usize) -> Result<(), ParseError> {
        match self.names.get(count) {
            Some(extra) => Err(ParseError::Unexpected(extra.to_string())),
            None => Ok(()),
        }
    }

    fn no_flags(&self) -> Result<(), ParseError> {
        match self.flags.first() {
            Some(flag) => Err(ParseError::Unexpected(format!("+{flag}"))),
            None => Ok(()),
        }
    }

    fn each_flag(&self, mut apply: impl FnMut(&str) -> bool) -> Result<(), ParseError> {
        for flag in self.flags.iter().copied() {
            if !apply(flag) {
                return Err(ParseError::Invalid {
                    what: "flag",
                    value: format!("+{flag}"),
                });
            }
        }
        Ok(())
    }
}

pub fn parse(input: &str) -> Result<Command, ParseError> {
    let mut words = input.split_whitespace();
    let head = words.next().ok_or(ParseError::Empty)?.to_ascii_lowercase();
    let args = Args::split(words);

    let command = match head.as_str() {
        "start" => {
            args.no_flags()?;
            let mut names = args.names.iter().copied().peekable();
            let side = match names.peek().and_then(|word| parse_side(word).ok()) {
                Some(side) => {
                    names.next();
                    Some(side)
                }
                None => None,
            };
            let players: BTreeSet<String> = names.map(str::to_string).collect();
            Command::Start {
                side,
                players: (!players.is_empty()).then_some(players),
            }
        }
        "throw" | "t" => {
            let thrower = args.name(0).ok_or(ParseError::Missing("thrower"))?;
            let receiver = args.name(1).ok_or(ParseError::Missing("receiver"))?;
            args.at_most(2)?;
            let mut flags = ThrowFlags::default();
            args.each_flag(|flag| {
                match flag {
                    "huck" => flags.huck = true,
                    "break" | "breakmark" => flags.breakmark = true,
                    "hammer" => flags.hammer = true,
                    "dump" => flags.dump = true,
                    "layout" => flags.layout = true,
                    "sky" => flags.sky = true,
                    "score" | "goal" => flags.score = true,
                    _ => return false,
                }
                true
            })?;
            Command::Throw {
                thrower,
                receiver,
                flags,
            }
        }
        "goal" => {
            args.no_flags()?;
            let scorer = args.name(0).ok_or(ParseError::Missing("scorer"))?;
            args.at_most(2)?;
            Command::Goal {
                scorer,
                assister: args.name(1),
            }
        }
        "they" => {
            args.no_flags()?;
            args.at_most(0)?;
            Command::TheyScore
        }
        "turn" | "turnover" => {
            args.at_most(2)?;
            let mut flags = TurnoverFlags::default();
            args.each_flag(|flag| {
                match flag {
                    "throwaway" => flags.throwaway = true,
                    "huck" => flags.huck = true,
                    "drop" | "receivererror" => flags.receiver_error = true,
                    "gooddefense" | "gd" => flags.good_defense = true,
                    "stall" => flags.stall = true,
                    _ => return false,
                }
                true
            })?;
            Command::Turnover {
                thrower: args.name(0),
                receiver: args.name(1),
                flags,
            }
        }
        "d" | "defense" => {
            args.at_most(1)?;
            let mut flags = DefenseFlags::default();
            args.each_flag(|flag| {
                match flag {
                    "block" => flags.block = true,
                    "int" | "interception" => flags.interception = true,
                    "callahan" => flags.callahan = true,
                    "layout" => flags.layout = true,
                    "sky" => flags.sky = true,
                    "stall" => flags.stall = true,
                    "unforced" => flags.unforced_error = true,
                    _ => return false,
                }
                true
            })?;
            Command::Defense {
                defender: args.name(0),
                flags,
            }
        }
        "pull" => {
            args.at_most(1)?;
            let mut quality = PullQuality::default();
            let mut flags = PullFlags::default();
            args.each_flag(|flag| {
                match flag {
                    "good" => quality = PullQuality::Good,
                    "ok" => quality = PullQuality::Ok,
                    "poor" => quality = PullQuality::Poor,
                    "brick" => quality = PullQuality::Brick,
                    "flick" => flags.flick = true,
                    "roller" => flags.roller = true,
                    "io" => flags.io = true,
                    "oi" => flags.oi = true,
                    _ => return false,
                }
                true
            })?;
            Command::Pull {
                puller: args.name(0),
                quality,
                flags,
            }
        }
        "viol" | "violation" => {
            args.at_most(2)?;
            let mut flags = ViolationFlags::default();
            args.each_flag(|flag| {
                match flag {
                    "foul" => flags.offensive_foul = true,
                    "strip" => flags.strip = true,
                    "pick" => flags.pick = true,
                    "travel" => flags.travel = true,
                    "contested" => flags.contested_foul = true,
                    "double" => flags.double_team = true,
                    _ => return false,
                }
                true
            })?;
            Command::Violation {
                thrower: args.name(0),
                receiver: args.name(1),
                flags,
            }
        }
        "other" => {
            args.at_most(0)?;
            let mut flags = OtherFlags::default();
            args.each_flag(|flag| {
                match flag {
                    "timeout" => flags.timeout = true,
                    "injury" => flags.injury_sub = true,
                    "timecap" => flags.timecap = true,
                    "switch" => flags.switch_sides = true,
                    "halftime" => flags.halftime = true,
                    _ => return false,
                }
                true
            })?;
            Command::Other(flags)
        }
        "undo" => simple(&args, Command::Undo)?,
        "pause" => simple(&args, Command::Pause)?,
        "resume" => simple(&args, Command::Resume)?,
        "feed" => simple(&args, Command::Feed)?,
        "status" | "s" => simple(&args, Command::Status)?,
        "versions" => simple(&args, Command::Versions)?,
        "end" => simple(&args, Command::EndGame)?,
        "help" | "?" => simple(&args, Command::Help)?,
        "quit" | "exit" | "q" => simple(&args, Command::Quit)?,
        "line" => {
            args.no_flags()?;
            let which = args.names.first().ok_or(ParseError::Missing("line type"))?;
            Command::Line {
                line: parse_line_type(which)?,
                players: args.names[1..].iter().map(|name| name.to_string()).collect(),
            }
        }
        "linetype" => {
            args.no_flags()?;
            args.at_most(1)?;
            let which = args.names.first().ok_or(ParseError::Missing("line type"))?;
            Command::ActiveLine(parse_line_type(which)?)
        }
        "claim" => Command::Claim(role_arg(&args)?),
        "release" => Command::Release(role_arg(&args)?),
        "handoff" => Command::Handoff(role_arg(&args)?),
        "accept" | "deny" => {
            args.no_flags()?;
            args.at_most(1)?;
            let raw = args.names.first().ok_or(ParseError::Missing("request id"))?;
            let request_id = raw.parse().map_err(|_| ParseError::Invalid {
                what: "request id",
                value: raw.to_string(),
            })?;
            Command::Respond {
                request_id,
                accept: head == "accept",
            }
        }
        "restore" => {
            args.no_flags()?;
            args.at_most(1)?;
            Command::Restore(args.name(0).ok_or(ParseError::Missing("version"))?)
        }
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(command)
}

fn simple(args: &Args<'_>, command: Command) -> Result<Command, ParseError> {
    args.no_flags()?;
    args.at_most(0)?;
    Ok(command)
}

fn role_arg(args: &Args<'_>) -> Result<Role, ParseError> {
    args.no_flags()?;
    args.at_most(1)?;
    let raw = args.names.first().ok_or(ParseError::Missing("role"))?;
    parse_role(raw)
}

pub fn parse_side(raw: &str) -> Result<Side, ParseError> {
    match raw.to_ascii_lowercase().as_str() {
        "o" | "offense" => Ok(Side::Offense),
        "d" | "defense" => Ok(Side::Defense),
        _ => Err(ParseError::Invalid {
            what: "side",
            value: raw.to_string(),
        }),
    }
}

pub fn parse_line_type(raw: &str) -> Result<LineType, ParseError> {
    match raw.to_ascii_lowercase().as_str() {
        "o" | "offense" => Ok(LineType::Offense),
        "d" | "defense" => Ok(LineType::Defense),
        "od" | "combined" => Ok(LineType::Combined),
        _ => Err(ParseError::Invalid {
            what: "line type",
            value: raw.to_string(),
        }),
    }
}

pub fn parse_role(raw: &str) -> Result<Role, ParseError> {
    match raw.to_ascii_lowercase().as_str() {
        "pbp" | "active" | "play-by-play" => Ok(Role::ActiveCoach),
        "line" | "lines" => Ok(Role::LineCoach),
        _ => Err(ParseError::Invalid {
            what: "role",
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn start_accepts_optional_side_and_players() {
        assert_eq!(
            parse("start").unwrap(),
            Command::Start {
                side: None,
                players: None
            }
        );
        assert_eq!(
            parse("start d Ana Ben").unwrap(),
            Command::Start {
                side: Some(Side::Defense),
                players: Some(names(&["Ana", "Ben"]))
            }
        );
        assert_eq!(
            parse("start Ana").unwrap(),
            Command::Start {
                side: None,
                players: Some(names(&["Ana"]))
            }
        );
    }

    #[test]
    fn throw_collects_flags() {
        let command = parse("throw Ana Ben +huck +score").unwrap();
        let Command::Throw { flags, .. } = command else {
            panic!("expected throw, got {command:?}");
        };
        assert!(flags.huck && flags.score);
        assert!(!flags.hammer);

        assert_eq!(parse("throw Ana").unwrap_err(), ParseError::Missing("receiver"));
        assert!(matches!(
            parse("throw Ana Ben +banana"),
            Err(ParseError::Invalid { what: "flag", .. })
        ));
    }

    #[test]
    fn conflicting_flags_are_left_for_validation() {
        let command = parse("turn Ana +throwaway +stall").unwrap();
        let Command::Turnover { flags, thrower, receiver } = command else {
            panic!("expected turnover");
        };
        assert!(flags.throwaway && flags.stall);
        assert_eq!(thrower.as_deref(), Some("Ana"));
        assert!(receiver.is_none());
    }

    #[test]
    fn pull_quality_and_style() {
        assert_eq!(
            parse("pull Cy +brick +io").unwrap(),
            Command::Pull {
                puller: Some("Cy".into()),
                quality: PullQuality::Brick,
                flags: PullFlags {
                    io: true,
                    ..Default::default()
                }
            }
        );
    }

    #[test]
    fn role_and_handoff_commands() {
        assert_eq!(parse("claim pbp").unwrap(), Command::Claim(Role::ActiveCoach));
        assert_eq!(parse("release line").unwrap(), Command::Release(Role::LineCoach));
        assert_eq!(
            parse("deny 7").unwrap(),
            Command::Respond {
                request_id: 7,
                accept: false
            }
        );
        assert!(matches!(
            parse("accept soon"),
            Err(ParseError::Invalid { what: "request id", .. })
        ));
    }

    #[test]
    fn line_commands() {
        assert_eq!(
            parse("line od Ana Ben").unwrap(),
            Command::Line {
                line: LineType::Combined,
                players: names(&["Ana", "Ben"])
            }
        );
        assert_eq!(parse("linetype o").unwrap(), Command::ActiveLine(LineType::Offense));
        assert!(parse("line x Ana").is_err());
    }

    #[test]
    fn rejects_noise() {
        assert_eq!(parse("   ").unwrap_err(), ParseError::Empty);
        assert_eq!(parse("undo now").unwrap_err(), ParseError::Unexpected("now".into()));
        assert!(matches!(parse("dance"), Err(ParseError::Unknown(_))));
    }
}
