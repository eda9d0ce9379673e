//! Job selection syntax used by batch runs.
//!
//! - `all` (or `*`): every job
//! - `2`: one job
//! - `1-3`: every existing job with an id in the inclusive range
//! - `1;3` or `1,3`: exactly these jobs

use std::fmt;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelection {
    All,
    Single(u32),
    Range { first: u32, last: u32 },
    List(Vec<u32>),
}

impl JobSelection {
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        let trimmed = input.trim();
        let invalid = |reason: &str| EngineError::InvalidSelection {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("empty selection"));
        }
        if trimmed.eq_ignore_ascii_case("all") || trimmed == "*" {
            return Ok(Self::All);
        }

        if let Some((first, last)) = trimmed.split_once('-') {
            let first = parse_id(first).ok_or_else(|| invalid("range start is not a job id"))?;
            let last = parse_id(last).ok_or_else(|| invalid("range end is not a job id"))?;
            if first > last {
                return Err(invalid("range start is after range end"));
            }
            return Ok(Self::Range { first, last });
        }

        if trimmed.contains(&[';', ','][..]) {
            let mut ids = Vec::new();
            for part in trimmed.split(&[';', ','][..]) {
                let id = parse_id(part).ok_or_else(|| invalid("list entry is not a job id"))?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            return Ok(Self::List(ids));
        }

        parse_id(trimmed)
            .map(Self::Single)
            .ok_or_else(|| invalid("not a job id"))
    }

    /// Whether `id` falls in this selection.
    pub fn contains(&self, id: u32) -> bool {
        match self {
            Self::All => true,
            Self::Single(single) => *single == id,
            Self::Range { first, last } => (*first..=*last).contains(&id),
            Self::List(ids) => ids.contains(&id),
        }
    }

    /// Ids that must exist in the registry for the selection to be valid.
    /// Ranges and `All` only cover what exists.
    pub fn required_ids(&self) -> &[u32] {
        match self {
            Self::Single(id) => std::slice::from_ref(id),
            Self::List(ids) => ids,
            Self::All | Self::Range { .. } => &[],
        }
    }
}

fn parse_id(s: &str) -> Option<u32> {
    s.trim().parse().ok()
}

impl fmt::Display for JobSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Single(id) => write!(f, "{id}"),
            Self::Range { first, last } => write!(f, "{first}-{last}"),
            Self::List(ids) => {
                let parts: Vec<String> = ids.iter().map(u32::to_string).collect();
                write!(f, "{}", parts.join(";"))
            }
        }
    }
}
