//! Parsing of console input lines into console actions.

use robolink_types::{ActivityType, CommandKind, Mode, Motion, RobotId};

const DEFAULT_JOINT_SPEED: f64 = 0.2;
const DEFAULT_LOG_LIMIT: usize = 20;

/// What `/logs` should show.
#[derive(Debug, Clone, PartialEq)]
pub enum LogQuery {
    Recent(usize),
    ByType(ActivityType, usize),
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Empty,
    Help,
    Robots,
    Connect { name: String, sim: bool },
    Status,
    /// Continuous velocity input, rate limited before it is sent.
    Drive(Motion),
    /// One-shot command sent as typed.
    Issue(CommandKind),
    Logs(LogQuery),
    Close,
    Quit,
}

pub fn parse(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Input::Empty);
    };
    let args: Vec<&str> = words.collect();

    let input = match head {
        "/help" => Input::Help,
        "/robots" => Input::Robots,
        "/status" => Input::Status,
        "/close" => Input::Close,
        "/quit" | "/exit" => Input::Quit,
        "/connect" => match args.as_slice() {
            [name] => Input::Connect {
                name: name.to_string(),
                sim: false,
            },
            [name, "sim"] => Input::Connect {
                name: name.to_string(),
                sim: true,
            },
            _ => return Err(usage("/connect <robot> [sim]")),
        },
        "/move" => match args.as_slice() {
            ["stop"] => Input::Drive(Motion::Velocity {
                x: 0.0,
                y: 0.0,
                yaw: 0.0,
            }),
            [x, y, yaw] => Input::Drive(Motion::Velocity {
                x: number(x)?,
                y: number(y)?,
                yaw: number(yaw)?,
            }),
            _ => return Err(usage("/move <x> <y> <yaw> | /move stop")),
        },
        "/pose" => match args.as_slice() {
            [x, y, z, r] => Input::Issue(CommandKind::Move(Motion::Pose {
                x: number(x)?,
                y: number(y)?,
                z: number(z)?,
                r: number(r)?,
            })),
            _ => return Err(usage("/pose <x> <y> <z> <r>")),
        },
        "/joint" => {
            let (joint, angle, speed) = match args.as_slice() {
                [joint, angle] => (joint, number(angle)?, DEFAULT_JOINT_SPEED),
                [joint, angle, speed] => (joint, number(angle)?, number(speed)?),
                _ => return Err(usage("/joint <name> <angle> [speed]")),
            };
            Input::Issue(CommandKind::Move(Motion::Joint {
                joint: joint.to_string(),
                angle,
                speed,
            }))
        }
        "/say" => {
            if args.is_empty() {
                return Err(usage("/say <text>"));
            }
            Input::Issue(CommandKind::Speak {
                text: args.join(" "),
            })
        }
        "/action" => match args.as_slice() {
            [name] => Input::Issue(CommandKind::PresetAction {
                name: name.to_string(),
            }),
            _ => return Err(usage("/action <name>")),
        },
        "/home" => Input::Issue(CommandKind::Home),
        "/mode" => match args.as_slice() {
            [name] => Input::Issue(CommandKind::SetMode(Mode::Named(name.to_string()))),
            _ => return Err(usage("/mode <name>")),
        },
        "/gait" => match args.as_slice() {
            [n] => {
                let gait = n
                    .parse::<u8>()
                    .map_err(|_| format!("'{n}' is not a gait number"))?;
                Input::Issue(CommandKind::SetMode(Mode::Gait(gait)))
            }
            _ => return Err(usage("/gait <n>")),
        },
        "/stance" => Input::Issue(CommandKind::SetMode(Mode::ToggleStance)),
        "/toggle" => match args.as_slice() {
            [name, state] => {
                let on = match *state {
                    "on" => true,
                    "off" => false,
                    other => return Err(format!("expected on|off, got '{other}'")),
                };
                Input::Issue(CommandKind::ToggleActuator {
                    name: name.to_string(),
                    on,
                })
            }
            _ => return Err(usage("/toggle <actuator> on|off")),
        },
        "/logs" => Input::Logs(parse_logs(&args)?),
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(input)
}

fn parse_logs(args: &[&str]) -> Result<LogQuery, String> {
    match args {
        [] => Ok(LogQuery::Recent(DEFAULT_LOG_LIMIT)),
        [n] if n.parse::<usize>().is_ok() => Ok(LogQuery::Recent(limit(n)?)),
        [kind] => Ok(LogQuery::ByType(kind.parse()?, DEFAULT_LOG_LIMIT)),
        [kind, n] => Ok(LogQuery::ByType(kind.parse()?, limit(n)?)),
        _ => Err(usage("/logs [type] [n]")),
    }
}

fn number(s: &str) -> Result<f64, String> {
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("'{s}' is not a number"))
}

fn limit(s: &str) -> Result<usize, String> {
    s.parse::<usize>()
        .map_err(|_| format!("'{s}' is not a count"))
}

fn usage(form: &str) -> String {
    format!("usage: {form}")
}

/// The command that halts a robot's base, for robots that drive.
pub fn stop_command(robot: RobotId) -> Option<CommandKind> {
    match robot {
        RobotId::Dog | RobotId::Vehicle | RobotId::Spider => {
            Some(CommandKind::Move(Motion::Velocity {
                x: 0.0,
                y: 0.0,
                yaw: 0.0,
            }))
        }
        RobotId::Pepper | RobotId::Arm => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_empty() {
        assert_eq!(parse("   "), Ok(Input::Empty));
    }

    #[test]
    fn connect_with_and_without_sim() {
        assert_eq!(
            parse("/connect dog"),
            Ok(Input::Connect {
                name: "dog".into(),
                sim: false
            })
        );
        assert_eq!(
            parse("/connect lab-dog sim"),
            Ok(Input::Connect {
                name: "lab-dog".into(),
                sim: true
            })
        );
        assert!(parse("/connect").is_err());
    }

    #[test]
    fn move_is_a_drive_sample() {
        assert_eq!(
            parse("/move 0.5 0 -0.2"),
            Ok(Input::Drive(Motion::Velocity {
                x: 0.5,
                y: 0.0,
                yaw: -0.2
            }))
        );
        assert_eq!(
            parse("/move stop"),
            Ok(Input::Drive(Motion::Velocity {
                x: 0.0,
                y: 0.0,
                yaw: 0.0
            }))
        );
        assert!(parse("/move fast 0 0").is_err());
        assert!(parse("/move NaN 0 0").is_err());
    }

    #[test]
    fn pose_is_issued_directly() {
        assert_eq!(
            parse("/pose 200 0 120 0"),
            Ok(Input::Issue(CommandKind::Move(Motion::Pose {
                x: 200.0,
                y: 0.0,
                z: 120.0,
                r: 0.0
            })))
        );
    }

    #[test]
    fn joint_speed_is_optional() {
        assert_eq!(
            parse("/joint HeadYaw 0.5"),
            Ok(Input::Issue(CommandKind::Move(Motion::Joint {
                joint: "HeadYaw".into(),
                angle: 0.5,
                speed: DEFAULT_JOINT_SPEED
            })))
        );
    }

    #[test]
    fn say_keeps_the_whole_sentence() {
        assert_eq!(
            parse("/say hello  there operator"),
            Ok(Input::Issue(CommandKind::Speak {
                text: "hello there operator".into()
            }))
        );
        assert!(parse("/say").is_err());
    }

    #[test]
    fn mode_gait_and_stance() {
        assert_eq!(
            parse("/gait 2"),
            Ok(Input::Issue(CommandKind::SetMode(Mode::Gait(2))))
        );
        assert!(parse("/gait 300").is_err());
        assert_eq!(
            parse("/stance"),
            Ok(Input::Issue(CommandKind::SetMode(Mode::ToggleStance)))
        );
        assert_eq!(
            parse("/mode climb"),
            Ok(Input::Issue(CommandKind::SetMode(Mode::Named("climb".into()))))
        );
    }

    #[test]
    fn toggle_needs_on_or_off() {
        assert_eq!(
            parse("/toggle magnet on"),
            Ok(Input::Issue(CommandKind::ToggleActuator {
                name: "magnet".into(),
                on: true
            }))
        );
        assert!(parse("/toggle magnet maybe").is_err());
    }

    #[test]
    fn logs_queries() {
        assert_eq!(parse("/logs"), Ok(Input::Logs(LogQuery::Recent(20))));
        assert_eq!(parse("/logs 5"), Ok(Input::Logs(LogQuery::Recent(5))));
        assert_eq!(
            parse("/logs robot_control 3"),
            Ok(Input::Logs(LogQuery::ByType(ActivityType::RobotControl, 3)))
        );
        assert!(parse("/logs gossip").is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(
            parse("/dance"),
            Err("unknown command '/dance'".to_string())
        );
    }

    #[test]
    fn only_driving_robots_have_a_stop() {
        assert!(stop_command(RobotId::Dog).is_some());
        assert!(stop_command(RobotId::Arm).is_none());
    }
}
