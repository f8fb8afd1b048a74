use crate::callback::{self, Action};
use crate::config::Config;
use crate::database::Database;
use crate::quest::{NewQuest, Player, Quest, QuestError};
use crate::web;
use humantime::format_rfc3339_seconds;
use ngrok::prelude::*;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use teloxide::dptree::{self, case};
use teloxide::types::User;
use teloxide::{
    dispatching::UpdateHandler, prelude::*, update_listeners::webhooks, utils::command::BotCommands,
};

type HandlerError = Box<dyn Error + Send + Sync>;
type HandlerResult = Result<(), HandlerError>;

const LEADERBOARD_SIZE: usize = 10;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "join the game.")]
    Start,
    #[command(description = "display this help.")]
    Help,
    #[command(description = "list quests you can take.")]
    Quests,
    #[command(description = "list your quests in progress.")]
    Active,
    #[command(description = "show your points.")]
    Profile,
    #[command(description = "show the leaderboard.")]
    Top,
    #[command(description = "create a quest: Title | Description | Reward (admins).")]
    AddQuest(String),
    #[command(description = "archive a quest by its number (admins).")]
    RemoveQuest(String),
}

pub async fn run(config: Config) {
    let db = match Database::open(&config.db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Can't open database {}: {}", config.db_path.display(), e);
            return;
        }
    };
    let config = Arc::new(config);

    debug!("Initializing the bot ...");
    let bot = Bot::from_env();
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Can't publish the command list: {}", e);
    }

    let result = if config.webhook {
        webhook(bot, db, config).await
    } else {
        polling(bot, db, config).await
    };
    if let Err(e) = result {
        error!("Bot stopped: {}", e);
    }
}

async fn polling(bot: Bot, db: Arc<Database>, config: Arc<Config>) -> HandlerResult {
    let app = web::router(db.clone());
    let port = config.port;
    let server = tokio::spawn(async move {
        if let Err(e) = web::serve(port, app).await {
            error!("Web server stopped: {}", e);
        }
    });

    info!("Receiving updates by long polling");
    Dispatcher::builder(bot, handler())
        .dependencies(dptree::deps![db, config])
        .build()
        .dispatch()
        .await;
    server.abort();
    Ok(())
}

async fn webhook(bot: Bot, db: Arc<Database>, config: Arc<Config>) -> HandlerResult {
    debug!("Building ngrok tunnel ...");
    let tunnel = ngrok::Session::builder()
        .authtoken_from_env()
        .connect()
        .await?
        .http_endpoint()
        .listen()
        .await?;

    debug!("Setting up the webhook ...");
    let addr = ([127, 0, 0, 1], config.port).into();
    let url = format!("{}/webhook", tunnel.url().trim_end_matches('/')).parse()?;
    let (listener, stop_flag, webhook_routes) =
        webhooks::axum_to_router(bot.clone(), webhooks::Options::new(addr, url)).await?;
    let app = webhook_routes.merge(web::router(db.clone()));

    tokio::spawn(async move {
        let served = axum::Server::builder(tunnel)
            .serve(app.into_make_service())
            .with_graceful_shutdown(stop_flag)
            .await;
        if let Err(e) = served {
            error!("Tunnel server stopped: {}", e);
        }
    });

    info!("Connection has been established");
    Dispatcher::builder(bot, handler())
        .dependencies(dptree::deps![db, config])
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;
    Ok(())
}

fn handler() -> UpdateHandler<HandlerError> {
    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(start))
        .branch(case![Command::Help].endpoint(help))
        .branch(case![Command::Quests].endpoint(quests))
        .branch(case![Command::Active].endpoint(active))
        .branch(case![Command::Profile].endpoint(profile))
        .branch(case![Command::Top].endpoint(top))
        .branch(case![Command::AddQuest(args)].endpoint(add_quest))
        .branch(case![Command::RemoveQuest(args)].endpoint(remove_quest));

    let message_handler = Update::filter_message().branch(command_handler);
    let callback_handler = Update::filter_callback_query().endpoint(callback);

    dptree::entry()
        .branch(message_handler)
        .branch(callback_handler)
}

async fn start(bot: Bot, msg: Message, db: Arc<Database>) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let name = display_name(user);
    let greeting = if db.register_player(player_id(user), &name)? {
        format!("Welcome, adventurer {}!", name)
    } else {
        format!("Welcome back, {}!", name)
    };
    bot.send_message(
        msg.chat.id,
        format!("{}\n\n{}", greeting, Command::descriptions()),
    )
    .await?;
    info!("User @{} has /start'ed the bot", name);
    Ok(())
}

async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    debug!("User @{} asked for /help", sender_name(&msg));
    Ok(())
}

async fn quests(bot: Bot, msg: Message, db: Arc<Database>) -> HandlerResult {
    let Some(user_id) = ensure_player(&msg, &db)? else {
        return Ok(());
    };
    let quests = db.available_quests(user_id)?;
    if quests.is_empty() {
        bot.send_message(msg.chat.id, "There are no quests for you right now.")
            .await?;
    } else {
        bot.send_message(msg.chat.id, render_quests("Available quests:", &quests))
            .reply_markup(callback::available_keyboard(&quests))
            .await?;
    }
    debug!("User @{} listed {} quest(s)", sender_name(&msg), quests.len());
    Ok(())
}

async fn active(bot: Bot, msg: Message, db: Arc<Database>) -> HandlerResult {
    let Some(user_id) = ensure_player(&msg, &db)? else {
        return Ok(());
    };
    let quests = db.active_quests(user_id)?;
    if quests.is_empty() {
        bot.send_message(msg.chat.id, "You have no quests in progress. Try /quests.")
            .await?;
    } else {
        bot.send_message(msg.chat.id, render_quests("In progress:", &quests))
            .reply_markup(callback::active_keyboard(&quests))
            .await?;
    }
    Ok(())
}

async fn profile(bot: Bot, msg: Message, db: Arc<Database>) -> HandlerResult {
    let Some(user_id) = ensure_player(&msg, &db)? else {
        return Ok(());
    };
    let Some(player) = db.player(user_id)? else {
        return Err(Box::new(QuestError::NotRegistered));
    };
    let completed = db.completed_count(user_id)?;
    bot.send_message(msg.chat.id, render_profile(&player, completed))
        .await?;
    Ok(())
}

async fn top(bot: Bot, msg: Message, db: Arc<Database>) -> HandlerResult {
    ensure_player(&msg, &db)?;
    let players = db.leaderboard(LEADERBOARD_SIZE)?;
    bot.send_message(msg.chat.id, render_leaderboard(&players))
        .await?;
    Ok(())
}

async fn add_quest(
    args: String,
    bot: Bot,
    msg: Message,
    db: Arc<Database>,
    config: Arc<Config>,
) -> HandlerResult {
    let Some(author) = admin(&bot, &msg, &config).await? else {
        return Ok(());
    };
    ensure_player(&msg, &db)?;
    let reply = match NewQuest::parse(&args).and_then(|new| db.add_quest(&new, author)) {
        Ok(quest) => format!(
            "Quest #{} \"{}\" is live ({} pts).",
            quest.id, quest.title, quest.reward
        ),
        Err(e) => {
            let reason = user_error(e)?;
            format!("{}\n\nCorrect usage:\n\n/addquest Title | Description | Reward", reason)
        }
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn remove_quest(
    args: String,
    bot: Bot,
    msg: Message,
    db: Arc<Database>,
    config: Arc<Config>,
) -> HandlerResult {
    if admin(&bot, &msg, &config).await?.is_none() {
        return Ok(());
    }
    ensure_player(&msg, &db)?;
    let reply = match args.trim().trim_start_matches('#').parse::<i64>() {
        Err(_) => "Correct usage:\n\n/removequest 12".to_string(),
        Ok(id) if db.archive_quest(id)? => format!("Quest #{} has been archived.", id),
        Ok(id) => format!("There is no live quest #{}.", id),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn callback(bot: Bot, q: CallbackQuery, db: Arc<Database>) -> HandlerResult {
    let Some(action) = q.data.as_deref().and_then(Action::parse) else {
        warn!("Unknown callback data {:?} from {}", q.data, q.from.id.0);
        bot.answer_callback_query(q.id).text("Unknown action").await?;
        return Ok(());
    };
    let user_id = player_id(&q.from);
    let result = db
        .register_player(user_id, &display_name(&q.from))
        .and_then(|_| match action {
            Action::Accept(id) => db
                .accept_quest(user_id, id)
                .map(|quest| format!("Quest accepted: {}", quest.title)),
            Action::Complete(id) => db
                .complete_quest(user_id, id)
                .map(|points| format!("Well done! You now have {} points.", points)),
            Action::Abandon(id) => db
                .abandon_quest(user_id, id)
                .map(|()| "Quest abandoned.".to_string()),
        });
    let notice = Notice::from(result);
    bot.answer_callback_query(q.id).text(notice.text()).await?;

    match notice {
        Notice::Failed(e) => return Err(Box::new(e)),
        Notice::Refused(_) => return Ok(()),
        Notice::Done(_) => {}
    }
    if let Some(message) = &q.message {
        if let Some(markup) = message.reply_markup() {
            trace!("Dropping {:?} from message {}", action, message.id.0);
            bot.edit_message_reply_markup(message.chat.id, message.id)
                .reply_markup(callback::without_quest(markup, action.quest_id()))
                .await?;
        }
    }
    Ok(())
}

/// How a button press ended, as shown to the presser.
#[derive(Debug)]
enum Notice {
    Done(String),
    Refused(String),
    Failed(QuestError),
}

impl From<Result<String, QuestError>> for Notice {
    fn from(result: Result<String, QuestError>) -> Self {
        match result {
            Ok(text) => Notice::Done(text),
            Err(e) if e.is_user_facing() => Notice::Refused(format!("Sorry, {}.", e)),
            Err(e) => Notice::Failed(e),
        }
    }
}

impl Notice {
    fn text(&self) -> String {
        match self {
            Notice::Done(text) | Notice::Refused(text) => text.clone(),
            Notice::Failed(_) => "Something went wrong, please try again later.".to_string(),
        }
    }
}

/// Registers the sender implicitly and returns their player id.
fn ensure_player(msg: &Message, db: &Database) -> Result<Option<i64>, HandlerError> {
    Ok(register_sender(db, msg.from())?)
}

fn register_sender(db: &Database, user: Option<&User>) -> Result<Option<i64>, QuestError> {
    match user {
        None => Ok(None),
        Some(user) => {
            let id = player_id(user);
            db.register_player(id, &display_name(user))?;
            Ok(Some(id))
        }
    }
}

/// Returns the sender's player id when they are an admin, replies otherwise.
async fn admin(bot: &Bot, msg: &Message, config: &Config) -> Result<Option<i64>, HandlerError> {
    match msg.from() {
        Some(user) if config.is_admin(user.id.0) => Ok(Some(player_id(user))),
        user => {
            warn!(
                "Refused admin command from {}",
                user.map(display_name).unwrap_or_else(|| "unknown".into())
            );
            bot.send_message(msg.chat.id, "Only admins can do that.")
                .await?;
            Ok(None)
        }
    }
}

/// Rule violations become the reply text, anything else propagates.
fn user_error(e: QuestError) -> Result<String, HandlerError> {
    if e.is_user_facing() {
        Ok(format!("Sorry, {}.", e))
    } else {
        Err(Box::new(e))
    }
}

fn player_id(user: &User) -> i64 {
    user.id.0 as i64
}

fn display_name(user: &User) -> String {
    match &user.username {
        Some(name) => name.clone(),
        None => user.first_name.clone(),
    }
}

fn sender_name(msg: &Message) -> String {
    msg.from()
        .map(display_name)
        .unwrap_or_else(|| "noname".to_string())
}

fn render_quests(header: &str, quests: &[Quest]) -> String {
    let mut text = String::from(header);
    for quest in quests {
        text += &format!(
            "\n\n#{} {} ({} pts)\n{}",
            quest.id, quest.title, quest.reward, quest.description
        );
    }
    text
}

fn render_profile(player: &Player, completed: i64) -> String {
    let joined = format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(player.joined_at.max(0) as u64))
        .to_string();
    let joined = joined.split('T').next().unwrap_or_default();
    format!(
        "@{}\nPoints: {}\nQuests completed: {}\nPlaying since {}",
        player.username, player.points, completed, joined
    )
}

fn render_leaderboard(players: &[Player]) -> String {
    if players.is_empty() {
        return "Nobody has joined yet.".to_string();
    }
    let mut text = String::from("Leaderboard:");
    for (rank, player) in players.iter().enumerate() {
        text += &format!("\n{}. @{} {}", rank + 1, player.username, player.points);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: i64, name: &str, points: i64) -> Player {
        Player {
            user_id: id,
            username: name.to_string(),
            points,
            joined_at: 1_700_000_000,
        }
    }

    #[test]
    fn commands_parse() {
        assert_eq!(Command::parse("/start", "questbot").unwrap(), Command::Start);
        assert_eq!(
            Command::parse("/addquest Find the key | Under the mat | 15", "questbot").unwrap(),
            Command::AddQuest("Find the key | Under the mat | 15".to_string())
        );
        assert_eq!(
            Command::parse("/removequest 4", "questbot").unwrap(),
            Command::RemoveQuest("4".to_string())
        );
        assert!(Command::parse("/dance", "questbot").is_err());
    }

    #[test]
    fn help_lists_every_command() {
        let help = Command::descriptions().to_string();
        for name in [
            "/start", "/help", "/quests", "/active", "/profile", "/top", "/addquest",
            "/removequest",
        ] {
            assert!(help.contains(name), "{} missing from help", name);
        }
    }

    #[test]
    fn leaderboard_text() {
        assert_eq!(render_leaderboard(&[]), "Nobody has joined yet.");
        let text = render_leaderboard(&[player(1, "alice", 30), player(2, "bob", 10)]);
        assert_eq!(text, "Leaderboard:\n1. @alice 30\n2. @bob 10");
    }

    #[test]
    fn profile_text() {
        let text = render_profile(&player(1, "alice", 30), 3);
        assert_eq!(
            text,
            "@alice\nPoints: 30\nQuests completed: 3\nPlaying since 2023-11-14"
        );
    }

    #[test]
    fn quest_list_text() {
        let quest = Quest {
            id: 5,
            title: "Fish".to_string(),
            description: "Catch three trout".to_string(),
            reward: 20,
            created_by: 1,
            archived: false,
        };
        assert_eq!(
            render_quests("Available quests:", &[quest]),
            "Available quests:\n\n#5 Fish (20 pts)\nCatch three trout"
        );
    }

    fn user(id: u64, username: Option<&str>) -> User {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "is_bot": false,
            "first_name": "Alice",
            "username": username,
        }))
        .unwrap()
    }

    #[test]
    fn senders_are_registered_implicitly() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(register_sender(&db, None).unwrap(), None);
        assert_eq!(db.stats().unwrap().players, 0);

        let alice = user(7, Some("alice"));
        assert_eq!(register_sender(&db, Some(&alice)).unwrap(), Some(7));
        assert_eq!(db.player(7).unwrap().unwrap().username, "alice");

        let anonymous = user(8, None);
        assert_eq!(register_sender(&db, Some(&anonymous)).unwrap(), Some(8));
        assert_eq!(db.player(8).unwrap().unwrap().username, "Alice");
        assert_eq!(db.stats().unwrap().players, 2);
    }

    #[test]
    fn every_press_gets_a_notice() {
        let done = Notice::from(Ok("Quest abandoned.".to_string()));
        assert!(matches!(done, Notice::Done(_)));
        assert_eq!(done.text(), "Quest abandoned.");

        let refused = Notice::from(Err(QuestError::NotActive(3)));
        assert!(matches!(refused, Notice::Refused(_)));
        assert_eq!(refused.text(), "Sorry, quest #3 is not in progress.");

        let failed = Notice::from(Err(QuestError::Storage(rusqlite::Error::InvalidQuery)));
        assert!(matches!(failed, Notice::Failed(QuestError::Storage(_))));
        assert_eq!(failed.text(), "Something went wrong, please try again later.");
    }

    #[test]
    fn only_rule_violations_reach_users() {
        assert_eq!(
            user_error(QuestError::AlreadyActive(2)).unwrap(),
            "Sorry, quest #2 is already in progress."
        );
        assert!(user_error(QuestError::Storage(rusqlite::Error::InvalidQuery)).is_err());
    }
}
