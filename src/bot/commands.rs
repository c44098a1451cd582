use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "显示帮助信息")]
    Start,
    #[command(description = "显示帮助信息")]
    Help,
    #[command(description = "列出所有服务器和流量统计")]
    Ll,
    #[command(description = "列出所有服务器和流量统计")]
    List,
    #[command(description = "重建指定服务器")]
    Rebuild(String),
    #[command(description = "删除指定服务器")]
    Stop(String),
    #[command(description = "查看监控状态")]
    Status,
    #[command(description = "查看流量使用情况")]
    Traffic,
}

/// Trimmed command argument, `None` when the user gave nothing.
pub fn argument(arg: &str) -> Option<&str> {
    let arg = arg.trim();
    (!arg.is_empty()).then_some(arg)
}
