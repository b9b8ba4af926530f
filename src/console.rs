use crate::settings::Setting;

/// One line of operator input on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Text(String),
    Image(String),
    Microphone(bool),
    Setting(Setting),
    /// Push the configured settings profile again.
    Settings,
    Heartbeat,
    ExitFeature,
    Status,
    Connect(Option<String>),
    Disconnect,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  text <message>         paginate and display a message
  image <file.bmp>       upload a 1-bit BMP
  mic on|off             toggle the right unit's microphone
  setting <op> <value>   send one display setting (op in hex, e.g. 0x10)
  settings               push the configured settings profile
  heartbeat              send a keep-alive
  exit                   leave the current dashboard feature
  status                 show session state
  connect [key]          connect to a pair (default: preferred pair)
  disconnect             disconnect both units
  quit                   disconnect and exit";

/// Parse one input line. Blank lines parse to `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };

    let cmd = match verb.to_ascii_lowercase().as_str() {
        "text" | "say" => {
            if rest.is_empty() {
                return Err("text needs a message".into());
            }
            ConsoleCommand::Text(rest.to_string())
        }
        "image" | "img" => {
            if rest.is_empty() {
                return Err("image needs a file path".into());
            }
            ConsoleCommand::Image(rest.to_string())
        }
        "mic" =>
            match rest {
                "on" | "1" => ConsoleCommand::Microphone(true),
                "off" | "0" => ConsoleCommand::Microphone(false),
                _ => {
                    return Err("usage: mic on|off".into());
                }
            }
        "setting" | "set" => {
            let mut parts = rest.split_whitespace();
            let (Some(op), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err("usage: setting <op> <value>".into());
            };
            let op = parse_u8(op).ok_or_else(|| format!("bad opcode {op:?}"))?;
            let value = parse_u8(value).ok_or_else(|| format!("bad value {value:?}"))?;
            let setting = Setting::from_raw(op, value).ok_or_else(||
                format!("unknown setting 0x{op:02X} or value {value}")
            )?;
            ConsoleCommand::Setting(setting)
        }
        "settings" => ConsoleCommand::Settings,
        "heartbeat" | "hb" => ConsoleCommand::Heartbeat,
        "exit" => ConsoleCommand::ExitFeature,
        "status" => ConsoleCommand::Status,
        "connect" => ConsoleCommand::Connect((!rest.is_empty()).then(|| rest.to_string())),
        "disconnect" => ConsoleCommand::Disconnect,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "q" => ConsoleCommand::Quit,
        other => {
            return Err(format!("unknown command {other:?}, try 'help'"));
        }
    };
    Ok(Some(cmd))
}

fn parse_u8(s: &str) -> Option<u8> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_keeps_spacing_inside() {
        assert_eq!(
            parse_line("text  hello   world ").unwrap(),
            Some(ConsoleCommand::Text("hello   world".into()))
        );
        assert!(parse_line("text").is_err());
    }

    #[test]
    fn test_mic() {
        assert_eq!(parse_line("mic on").unwrap(), Some(ConsoleCommand::Microphone(true)));
        assert_eq!(parse_line("MIC off").unwrap(), Some(ConsoleCommand::Microphone(false)));
        assert!(parse_line("mic maybe").is_err());
    }

    #[test]
    fn test_setting_hex_and_decimal() {
        assert_eq!(
            parse_line("setting 0x10 80").unwrap(),
            Some(ConsoleCommand::Setting(Setting::Brightness(80)))
        );
        assert_eq!(
            parse_line("set 26 2").unwrap(),
            Some(ConsoleCommand::Setting(Setting::TouchSensitivity(2)))
        );
        assert!(parse_line("setting 0x17 1").is_err());
        assert!(parse_line("setting 0x10").is_err());
    }

    #[test]
    fn test_connect_optional_key() {
        assert_eq!(parse_line("connect").unwrap(), Some(ConsoleCommand::Connect(None)));
        assert_eq!(parse_line("connect 07").unwrap(), Some(ConsoleCommand::Connect(Some("07".into()))));
    }

    #[test]
    fn test_blank_and_unknown() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(parse_line("dance").is_err());
        assert_eq!(parse_line("q").unwrap(), Some(ConsoleCommand::Quit));
    }
}
