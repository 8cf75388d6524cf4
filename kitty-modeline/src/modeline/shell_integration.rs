// Shell integration for kitty-modeline
//
// After every command the hook exports exit status, pipeline status, job count,
// width and (where the shell tracks it) duration into a background
// `kitty-modeline-client` run. The client inherits the terminal as stdout, which
// is how it finds its daemon.
//
// The hook lives in a marked block of the rc file so install is idempotent and
// uninstall removes exactly what was added.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const MARKER_START: &str = "# >>> kitty-modeline >>>";
const MARKER_END: &str = "# <<< kitty-modeline <<<";

/// Supported shell types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellType {
    Zsh,
    Bash,
    Fish,
}

impl ShellType {
    /// Detect shell type from $SHELL
    pub fn detect() -> Option<Self> {
        let shell = env::var("SHELL").ok()?;
        Self::from_path(&shell)
    }

    pub fn from_path(path: &str) -> Option<Self> {
        match path.rsplit('/').next()? {
            "zsh" => Some(ShellType::Zsh),
            "bash" => Some(ShellType::Bash),
            "fish" => Some(ShellType::Fish),
            _ => None,
        }
    }

    /// Default rc file for this shell
    pub fn rc_file_path(&self) -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;

        let path = match self {
            ShellType::Zsh => home.join(".zshrc"),
            ShellType::Bash => home.join(".bashrc"),
            ShellType::Fish => home.join(".config/fish/config.fish"),
        };
        Ok(path)
    }

    pub fn hook_snippet(&self) -> &'static str {
        match self {
            ShellType::Zsh => ZSH_SNIPPET,
            ShellType::Bash => BASH_SNIPPET,
            ShellType::Fish => FISH_SNIPPET,
        }
    }
}

impl std::fmt::Display for ShellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShellType::Zsh => write!(f, "zsh"),
            ShellType::Bash => write!(f, "bash"),
            ShellType::Fish => write!(f, "fish"),
        }
    }
}

impl std::str::FromStr for ShellType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "zsh" => Ok(ShellType::Zsh),
            "bash" => Ok(ShellType::Bash),
            "fish" => Ok(ShellType::Fish),
            _ => Err(anyhow!(
                "Unknown shell type: {}. Supported: zsh, bash, fish",
                s
            )),
        }
    }
}

const ZSH_SNIPPET: &str = r#"# >>> kitty-modeline >>>
# Push prompt state to the kitty-modeline daemon of this terminal
zmodload -F zsh/datetime p:EPOCHREALTIME
_kitty_modeline_preexec() {
  _kitty_modeline_started=$EPOCHREALTIME
}
_kitty_modeline_precmd() {
  local st=$? pst="${pipestatus[*]}" dur=
  if [[ -n "$_kitty_modeline_started" ]]; then
    dur=$(( int((EPOCHREALTIME - _kitty_modeline_started) * 1000) ))
    unset _kitty_modeline_started
  fi
  env STARSHIP_CMD_STATUS="$st" STARSHIP_PIPE_STATUS="$pst" \
    NUM_JOBS="${#jobstates}" COLUMNS="$COLUMNS" \
    ${dur:+STARSHIP_DURATION="$dur"} \
    kitty-modeline-client 2>/dev/null &!
}
precmd_functions=(_kitty_modeline_precmd $precmd_functions)
preexec_functions+=(_kitty_modeline_preexec)
# <<< kitty-modeline <<<"#;

const BASH_SNIPPET: &str = r#"# >>> kitty-modeline >>>
# Push prompt state to the kitty-modeline daemon of this terminal
_kitty_modeline_precmd() {
  local st=$? pst="${PIPESTATUS[*]}"
  local -a jobs_
  jobs_=($(jobs -p))
  (env STARSHIP_CMD_STATUS="$st" STARSHIP_PIPE_STATUS="$pst" \
    NUM_JOBS="${#jobs_[@]}" COLUMNS="${COLUMNS:-80}" \
    kitty-modeline-client 2>/dev/null &)
}
PROMPT_COMMAND="_kitty_modeline_precmd${PROMPT_COMMAND:+;$PROMPT_COMMAND}"
# <<< kitty-modeline <<<"#;

const FISH_SNIPPET: &str = r#"# >>> kitty-modeline >>>
# Push prompt state to the kitty-modeline daemon of this terminal
function _kitty_modeline_postexec --on-event fish_postexec
  set -l st $status
  set -l pst "$pipestatus"
  env STARSHIP_CMD_STATUS=$st STARSHIP_PIPE_STATUS=$pst \
    NUM_JOBS=(count (jobs -p)) COLUMNS=$COLUMNS \
    STARSHIP_DURATION=$CMD_DURATION \
    kitty-modeline-client 2>/dev/null &
  disown
end
# <<< kitty-modeline <<<"#;

/// Append the hook block to the rc file; a no-op when already present
pub fn install(shell: ShellType, rc_path: Option<PathBuf>) -> Result<PathBuf> {
    let rc_file = rc_path.map(Ok).unwrap_or_else(|| shell.rc_file_path())?;

    let existing = if rc_file.exists() {
        fs::read_to_string(&rc_file)
            .with_context(|| format!("Failed to read {}", rc_file.display()))?
    } else {
        if let Some(parent) = rc_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        String::new()
    };

    if existing.contains(MARKER_START) {
        return Ok(rc_file);
    }

    let snippet = shell.hook_snippet();
    let new_content = if existing.is_empty() || existing.ends_with('\n') {
        format!("{}{}\n", existing, snippet)
    } else {
        format!("{}\n\n{}\n", existing, snippet)
    };

    fs::write(&rc_file, new_content)
        .with_context(|| format!("Failed to write to {}", rc_file.display()))?;

    Ok(rc_file)
}

/// Remove the hook block; returns false when there was nothing to remove
pub fn uninstall(rc_path: &Path) -> Result<bool> {
    if !rc_path.exists() {
        return Ok(false);
    }

    let content = fs::read_to_string(rc_path)
        .with_context(|| format!("Failed to read {}", rc_path.display()))?;

    let (start, end) = match (content.find(MARKER_START), content.find(MARKER_END)) {
        (Some(start), Some(end)) if start < end => (start, end),
        // Not installed, or a hand-edited block we should not guess about
        _ => return Ok(false),
    };

    let block_end = content[end..]
        .find('\n')
        .map(|i| end + i + 1)
        .unwrap_or(content.len());

    // Swallow the blank lines install put in front of the block
    let mut block_start = start;
    while block_start > 0 && content.as_bytes()[block_start - 1] == b'\n' {
        block_start -= 1;
    }
    if block_start > 0 {
        block_start += 1;
    }

    let remaining = format!("{}{}", &content[..block_start], &content[block_end..]);
    let trimmed = remaining.trim_end();
    let final_content = if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    };

    fs::write(rc_path, final_content)
        .with_context(|| format!("Failed to write to {}", rc_path.display()))?;

    Ok(true)
}

pub fn is_installed(rc_path: &Path) -> Result<bool> {
    if !rc_path.exists() {
        return Ok(false);
    }

    let content = fs::read_to_string(rc_path)
        .with_context(|| format!("Failed to read {}", rc_path.display()))?;

    Ok(content.contains(MARKER_START) && content.contains(MARKER_END))
}
