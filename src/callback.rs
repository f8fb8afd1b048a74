use crate::quest::Quest;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardButtonKind, InlineKeyboardMarkup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept(i64),
    Complete(i64),
    Abandon(i64),
}

impl Action {
    pub fn parse(data: &str) -> Option<Self> {
        let (verb, id) = data.split_once(':')?;
        let id = id.parse().ok()?;
        match verb {
            "accept" => Some(Action::Accept(id)),
            "done" => Some(Action::Complete(id)),
            "drop" => Some(Action::Abandon(id)),
            _ => None,
        }
    }

    pub fn data(&self) -> String {
        match self {
            Action::Accept(id) => format!("accept:{}", id),
            Action::Complete(id) => format!("done:{}", id),
            Action::Abandon(id) => format!("drop:{}", id),
        }
    }

    pub fn quest_id(&self) -> i64 {
        match *self {
            Action::Accept(id) | Action::Complete(id) | Action::Abandon(id) => id,
        }
    }
}

pub fn available_keyboard(quests: &[Quest]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(quests.iter().map(|quest| {
        vec![InlineKeyboardButton::callback(
            format!("Accept #{} ({} pts)", quest.id, quest.reward),
            Action::Accept(quest.id).data(),
        )]
    }))
}

pub fn active_keyboard(quests: &[Quest]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(quests.iter().map(|quest| {
        vec![
            InlineKeyboardButton::callback(
                format!("Complete #{}", quest.id),
                Action::Complete(quest.id).data(),
            ),
            InlineKeyboardButton::callback(
                format!("Abandon #{}", quest.id),
                Action::Abandon(quest.id).data(),
            ),
        ]
    }))
}

/// Drops every row that carries a button for `quest_id`.
pub fn without_quest(markup: &InlineKeyboardMarkup, quest_id: i64) -> InlineKeyboardMarkup {
    let rows = markup
        .inline_keyboard
        .iter()
        .filter(|row| {
            !row.iter().any(|button| match &button.kind {
                InlineKeyboardButtonKind::CallbackData(data) => {
                    Action::parse(data).map(|a| a.quest_id()) == Some(quest_id)
                }
                _ => false,
            })
        })
        .cloned();
    InlineKeyboardMarkup::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quest(id: i64) -> Quest {
        Quest {
            id,
            title: format!("Quest {}", id),
            description: String::new(),
            reward: 10 * id,
            created_by: 1,
            archived: false,
        }
    }

    #[test]
    fn parses_known_actions() {
        assert_eq!(Action::parse("accept:3"), Some(Action::Accept(3)));
        assert_eq!(Action::parse("done:42"), Some(Action::Complete(42)));
        assert_eq!(Action::parse("drop:7"), Some(Action::Abandon(7)));
        assert_eq!(Action::parse(&Action::Complete(9).data()), Some(Action::Complete(9)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Action::parse(""), None);
        assert_eq!(Action::parse("accept"), None);
        assert_eq!(Action::parse("accept:x"), None);
        assert_eq!(Action::parse("steal:1"), None);
        assert_eq!(Action::parse("accept:1:2"), None);
    }

    #[test]
    fn callback_data_fits_telegram_limit() {
        assert!(Action::Abandon(i64::MIN).data().len() <= 64);
        assert!(Action::Accept(i64::MAX).data().len() <= 64);
    }

    #[test]
    fn used_rows_are_removed() {
        let quests = [quest(1), quest(2), quest(3)];
        let markup = active_keyboard(&quests);
        assert_eq!(markup.inline_keyboard.len(), 3);
        assert_eq!(markup.inline_keyboard[0].len(), 2);

        let trimmed = without_quest(&markup, 2);
        assert_eq!(trimmed.inline_keyboard.len(), 2);
        let remaining: Vec<String> = trimmed
            .inline_keyboard
            .iter()
            .map(|row| row[0].text.clone())
            .collect();
        assert_eq!(remaining, vec!["Complete #1", "Complete #3"]);

        let untouched = without_quest(&available_keyboard(&quests), 99);
        assert_eq!(untouched.inline_keyboard.len(), 3);
    }
}
