pub mod commands;

use crate::bot::commands::{argument, Command};
use crate::format;
use crate::monitor::Monitor;
use log::{debug, info, warn};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};
use teloxide::utils::command::BotCommands;
use teloxide::RequestError;

async fn reply(bot: &Bot, msg: &Message, text: String) -> Result<(), RequestError> {
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    monitor: Arc<Monitor>,
) -> Result<(), RequestError> {
    info!("bot: {cmd:?} from chat {}", msg.chat.id);

    let text = match cmd {
        Command::Start | Command::Help => format::help_text(),
        Command::Ll | Command::List => format::server_list(&monitor.get_all_servers().await),
        Command::Traffic => format::traffic_report(&monitor.get_all_servers().await),
        Command::Status => format::status_text(monitor.config(), monitor.last_check().await),
        Command::Rebuild(arg) => match argument(&arg) {
            Some(name) => {
                let ok = monitor.rebuild_server(name).await;
                format::action_result(name, ok, "重建成功", "重建失败")
            }
            None => "❌ 使用方法: /rebuild &lt;服务器名&gt;".to_string(),
        },
        Command::Stop(arg) => match argument(&arg) {
            Some(name) => {
                let ok = monitor.delete_server(name).await;
                format::action_result(name, ok, "已删除", "删除失败")
            }
            None => "❌ 使用方法: /stop &lt;服务器名&gt;".to_string(),
        },
    };

    reply(&bot, &msg, text).await
}

pub async fn run(bot: Bot, monitor: Arc<Monitor>) {
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {err}");
    }

    let allowed = monitor.chat_id();
    let handler = Update::filter_message().branch(
        dptree::filter(move |msg: Message| {
            if msg.chat.id != allowed {
                warn!("bot: ignoring message from chat {}", msg.chat.id);
                return false;
            }
            true
        })
        .filter_command::<Command>()
        .endpoint(handle_command),
    );

    info!("Starting Telegram bot");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![monitor])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
