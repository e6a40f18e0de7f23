use anyhow::{anyhow, bail, Context};

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Trigger { layer: usize, clip: usize },
    Clear { layer: usize },
    Opacity { layer: usize, value: f32 },
    Column { column: usize },
    Reload,
    Host { host: String, port: u16 },
    Help,
    Quit,
}

pub const HELP: &str = "\
commands (numbers start at 1):
  t LAYER CLIP     trigger clip
  c LAYER          clear layer
  o LAYER VALUE    set layer opacity (0.0 - 1.0)
  col COLUMN       trigger column
  r                reload thumbnails
  host HOST PORT   connect to another mixer
  q                quit";

pub fn index(raw: &str, what: &str) -> anyhow::Result<usize> {
    let n: usize = raw
        .parse()
        .with_context(|| format!("{what} must be a number, got {raw:?}"))?;
    n.checked_sub(1)
        .ok_or_else(|| anyhow!("{what} numbers start at 1"))
}

pub fn parse(line: &str) -> anyhow::Result<Option<Input>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, args)) = parts.split_first() else {
        return Ok(None);
    };

    let input = match (cmd, args) {
        ("t", [layer, clip]) => Input::Trigger {
            layer: index(layer, "layer")?,
            clip: index(clip, "clip")?,
        },
        ("c", [layer]) => Input::Clear {
            layer: index(layer, "layer")?,
        },
        ("o", [layer, value]) => {
            let value: f32 = value
                .parse()
                .with_context(|| format!("opacity must be a number, got {value:?}"))?;
            if !value.is_finite() {
                bail!("opacity must be finite");
            }
            Input::Opacity {
                layer: index(layer, "layer")?,
                value,
            }
        }
        ("col", [column]) => Input::Column {
            column: index(column, "column")?,
        },
        ("r", []) => Input::Reload,
        ("host", [host, port]) => Input::Host {
            host: host.to_string(),
            port: port
                .parse()
                .with_context(|| format!("invalid port {port:?}"))?,
        },
        ("h" | "help" | "?", []) => Input::Help,
        ("q" | "quit", []) => Input::Quit,
        _ => bail!("unrecognized command {line:?}, type `help`"),
    };
    Ok(Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_based_commands() {
        assert_eq!(
            parse("t 1 1").unwrap(),
            Some(Input::Trigger { layer: 0, clip: 0 })
        );
        assert_eq!(parse("  c 3 ").unwrap(), Some(Input::Clear { layer: 2 }));
        assert_eq!(
            parse("o 2 0.3").unwrap(),
            Some(Input::Opacity {
                layer: 1,
                value: 0.3
            })
        );
        assert_eq!(parse("col 4").unwrap(), Some(Input::Column { column: 3 }));
        assert_eq!(parse("r").unwrap(), Some(Input::Reload));
        assert_eq!(
            parse("host 10.0.0.5 8081").unwrap(),
            Some(Input::Host {
                host: "10.0.0.5".to_string(),
                port: 8081
            })
        );
        assert_eq!(parse("q").unwrap(), Some(Input::Quit));
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("t 0 1").is_err());
        assert!(parse("t 1").is_err());
        assert!(parse("o 1 NaN").is_err());
        assert!(parse("host x 99999").is_err());
        assert!(parse("launch").is_err());
    }
}
