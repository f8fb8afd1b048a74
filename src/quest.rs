use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const MAX_TITLE: usize = 64;
pub const MAX_DESCRIPTION: usize = 512;
pub const MAX_REWARD: i64 = 10_000;

#[derive(Debug, Error)]
pub enum QuestError {
    #[error("you are not registered yet, send /start first")]
    NotRegistered,
    #[error("quest #{0} does not exist")]
    UnknownQuest(i64),
    #[error("quest #{0} is no longer available")]
    QuestArchived(i64),
    #[error("quest #{0} is already in progress")]
    AlreadyActive(i64),
    #[error("quest #{0} is already completed")]
    AlreadyCompleted(i64),
    #[error("quest #{0} is not in progress")]
    NotActive(i64),
    #[error("{0}")]
    Invalid(String),
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl QuestError {
    /// Rule violations are reported back to the user; storage failures are not.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, QuestError::Storage(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Player {
    pub user_id: i64,
    pub username: String,
    pub points: i64,
    #[serde(skip)]
    pub joined_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quest {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub reward: i64,
    pub created_by: i64,
    pub archived: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStatus {
    Active,
    Completed,
    Abandoned,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = QuestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AssignmentStatus::Active),
            "completed" => Ok(AssignmentStatus::Completed),
            "abandoned" => Ok(AssignmentStatus::Abandoned),
            other => Err(QuestError::Invalid(format!(
                "unknown assignment status {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub players: i64,
    pub quests: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuest {
    pub title: String,
    pub description: String,
    pub reward: i64,
}

impl NewQuest {
    /// Parses `Title | Description | Reward`.
    pub fn parse(args: &str) -> Result<Self, QuestError> {
        let parts: Vec<&str> = args.split('|').map(str::trim).collect();
        let [title, description, reward] = parts[..] else {
            return Err(QuestError::Invalid(
                "expected: Title | Description | Reward".to_string(),
            ));
        };
        let reward = reward
            .parse::<i64>()
            .map_err(|_| QuestError::Invalid(format!("reward {:?} is not a number", reward)))?;
        let quest = NewQuest {
            title: title.to_string(),
            description: description.to_string(),
            reward,
        };
        quest.validate()?;
        Ok(quest)
    }

    pub fn validate(&self) -> Result<(), QuestError> {
        let title = self.title.chars().count();
        if title == 0 || title > MAX_TITLE {
            return Err(QuestError::Invalid(format!(
                "title must be 1 to {} characters long",
                MAX_TITLE
            )));
        }
        let description = self.description.chars().count();
        if description == 0 || description > MAX_DESCRIPTION {
            return Err(QuestError::Invalid(format!(
                "description must be 1 to {} characters long",
                MAX_DESCRIPTION
            )));
        }
        if self.reward < 1 || self.reward > MAX_REWARD {
            return Err(QuestError::Invalid(format!(
                "reward must be between 1 and {}",
                MAX_REWARD
            )));
        }
        Ok(())
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_quest() {
        let quest = NewQuest::parse(" Slay the dragon |  Bring back a scale | 150 ").unwrap();
        assert_eq!(quest.title, "Slay the dragon");
        assert_eq!(quest.description, "Bring back a scale");
        assert_eq!(quest.reward, 150);
    }

    #[test]
    fn rejects_wrong_shape() {
        assert!(matches!(
            NewQuest::parse("Only a title"),
            Err(QuestError::Invalid(_))
        ));
        assert!(matches!(
            NewQuest::parse("a | b | 1 | extra"),
            Err(QuestError::Invalid(_))
        ));
        assert!(matches!(
            NewQuest::parse("a | b | lots"),
            Err(QuestError::Invalid(_))
        ));
    }

    #[test]
    fn enforces_bounds() {
        assert!(NewQuest::parse(" | b | 1").is_err());
        assert!(NewQuest::parse("a |  | 1").is_err());
        assert!(NewQuest::parse("a | b | 0").is_err());
        assert!(NewQuest::parse("a | b | -5").is_err());
        assert!(NewQuest::parse("a | b | 10001").is_err());
        assert!(NewQuest::parse("a | b | 10000").is_ok());
        let long = "x".repeat(MAX_TITLE + 1);
        assert!(NewQuest::parse(&format!("{} | b | 1", long)).is_err());
        let exact = "é".repeat(MAX_TITLE);
        assert!(NewQuest::parse(&format!("{} | b | 1", exact)).is_ok());
    }

    #[test]
    fn status_text_round_trip() {
        for status in [
            AssignmentStatus::Active,
            AssignmentStatus::Completed,
            AssignmentStatus::Abandoned,
        ] {
            assert_eq!(status.as_str().parse::<AssignmentStatus>().unwrap(), status);
        }
        assert!("paused".parse::<AssignmentStatus>().is_err());
    }

    #[test]
    fn storage_errors_stay_internal() {
        assert!(QuestError::NotActive(3).is_user_facing());
        let storage = QuestError::Storage(rusqlite::Error::InvalidQuery);
        assert!(!storage.is_user_facing());
    }
}
