use std::time::Duration;

use anyhow::{bail, Context, Result};

/// 重播腳本中的一個步驟。 / One command of a replay script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Open(String),
    /// 在目前內容後附加文字。 / Appends text to the active document.
    Type(String),
    Set(String),
    Wait(Duration),
    Save,
    /// 模擬其他程式寫入檔案。 / Writes the file behind the coordinator's back.
    External { path: String, text: String },
    Delete(String),
    Discard,
    Status,
}

/// 解析腳本；空行與 `#` 開頭的行會被忽略。 / Parses a script, skipping blank lines and `#` comments.
///
/// Text arguments keep everything after the first space verbatim and understand
/// the escapes `\n`, `\t` and `\\`.
pub fn parse(source: &str) -> Result<Vec<(usize, Step)>> {
    let mut steps = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end();
        if line.trim_start().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let step = parse_line(line.trim_start())
            .with_context(|| format!("script line {line_no}: `{line}`"))?;
        steps.push((line_no, step));
    }
    Ok(steps)
}

fn parse_line(line: &str) -> Result<Step> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let step = match command {
        "open" => Step::Open(required(rest, "path")?),
        "type" => Step::Type(unescape(rest)),
        "set" => Step::Set(unescape(rest)),
        "wait" => {
            let arg = required(rest, "milliseconds")?;
            let ms: u64 = arg
                .parse()
                .with_context(|| format!("invalid duration `{arg}`"))?;
            Step::Wait(Duration::from_millis(ms))
        }
        "save" => Step::Save,
        "external" => {
            let (path, text) = rest.trim_start().split_once(' ').unwrap_or((rest, ""));
            Step::External {
                path: required(path, "path")?,
                text: unescape(text),
            }
        }
        "delete" => Step::Delete(required(rest, "path")?),
        "discard" => Step::Discard,
        "status" => Step::Status,
        other => bail!("unknown command `{other}`"),
    };
    Ok(step)
}

fn required(arg: &str, what: &str) -> Result<String> {
    let arg = arg.trim();
    if arg.is_empty() {
        bail!("missing {what}");
    }
    Ok(arg.to_string())
}

fn unescape(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some('\\') => output.push('\\'),
            Some(other) => {
                output.push('\\');
                output.push(other);
            }
            None => output.push('\\'),
        }
    }
    output
}
