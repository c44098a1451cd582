//! Telegram message bodies (HTML parse mode).

use crate::hcloud::model::{Server, TrafficUsage};
use crate::model::Config;
use chrono::{DateTime, Local};
use teloxide::utils::html::escape;

pub const PROGRESS_BAR_CELLS: usize = 20;
pub const NO_SERVERS: &str = "❌ 没有找到运行的服务器";

pub fn help_text() -> String {
    [
        "🤖 <b>Hetzner 流量监控机器人 v6.0</b>",
        "",
        "<b>命令列表:</b>",
        "/start, /help - 显示帮助信息",
        "/ll, /list - 列出所有服务器和流量统计",
        "/rebuild &lt;服务器名&gt; - 重建指定服务器",
        "/stop &lt;服务器名&gt; - 删除指定服务器",
        "/status - 查看监控状态",
        "/traffic - 查看流量使用情况",
        "",
        "<b>自动功能:</b>",
        "• 定时监控流量使用",
        "• 流量预警(阈值通知)",
        "• 超限自动删除保护",
        "• 定时睡眠模式(定时关机, 定时开机)",
    ]
    .join("\n")
}

pub fn progress_bar(percent: f64) -> String {
    let filled = ((PROGRESS_BAR_CELLS as f64 * percent / 100.0) as usize).min(PROGRESS_BAR_CELLS);
    format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(PROGRESS_BAR_CELLS - filled)
    )
}

fn gb(usage: &TrafficUsage) -> String {
    format!("{:.2}GB/{:.0}GB", usage.used_gb, usage.total_gb)
}

pub fn server_list(servers: &[Server]) -> String {
    if servers.is_empty() {
        return NO_SERVERS.to_string();
    }

    let mut text = "🖥️ <b>服务器列表</b>\n\n".to_string();
    for server in servers {
        let usage = TrafficUsage::from_server(server);
        let emoji = if server.is_running() { "🟢" } else { "🔴" };
        text += &format!("{emoji} <b>{}</b>\n", escape(&server.name));
        text += &format!("  📊 流量: {:.1}% ({})\n", usage.percent(), gb(&usage));
        text += &format!("  🏷️ 类型: {}\n", escape(&server.server_type.name));
        text += &format!("  📍 位置: {}\n", escape(&server.datacenter.location.name));
        text += &format!("  🔄 状态: {}\n\n", escape(&server.status));
    }
    text
}

pub fn traffic_report(servers: &[Server]) -> String {
    if servers.is_empty() {
        return NO_SERVERS.to_string();
    }

    let mut text = "📈 <b>流量使用统计</b>\n\n".to_string();
    for server in servers {
        let usage = TrafficUsage::from_server(server);
        text += &format!("<b>{}</b>\n", escape(&server.name));
        text += &format!(
            "<code>{}</code> {:.1}%\n",
            progress_bar(usage.percent()),
            usage.percent()
        );
        text += &format!("{} · 剩余 {:.0}GB\n\n", gb(&usage), usage.remaining_gb());
    }
    text
}

fn percents(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{v}%"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn status_text(config: &Config, last_check: Option<DateTime<Local>>) -> String {
    let last_check = last_check
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "尚未检查".to_string());
    let sleep = &config.sleep_mode;

    let mut text = "📊 <b>监控系统状态</b>\n\n".to_string();
    text += &format!("🕒 最后检查: {last_check}\n");
    text += &format!("⏱️ 检查间隔: {}分钟\n", config.check_interval_minutes);
    text += &format!("🔔 通知阈值: {}\n", percents(&config.notification_thresholds));
    text += &format!("🚨 删除阈值: {}%\n", config.traffic_limit_percent);
    text += &format!(
        "⏰ 睡眠模式: {}\n",
        if sleep.enable { "启用" } else { "禁用" }
    );
    if sleep.enable {
        text += &format!("  🛌 关机时间: {}\n", sleep.shutdown_time);
        text += &format!("  ☀️ 开机时间: {}\n", sleep.startup_time);
    }
    text
}

pub fn threshold_alert(server: &Server, usage: f64, now: DateTime<Local>) -> String {
    format!(
        "⚠️ <b>流量预警: {}</b>\n📊 使用率: {usage:.1}%\n🔄 状态: {}\n⏰ 时间: {}",
        escape(&server.name),
        escape(&server.status),
        now.format("%H:%M:%S")
    )
}

pub fn exceeded_alert(server: &Server, usage: f64) -> String {
    format!(
        "🚨 <b>流量超限警报: {}</b>\n📊 使用率: {usage:.1}%\n🗑️ 正在自动删除服务器以保护账户...",
        escape(&server.name)
    )
}

pub fn shutdown_done(name: &str) -> String {
    format!("🌙 <b>定时关机完成</b>\n服务器 {} 已删除", escape(name))
}

pub fn startup_done(name: &str, ip: Option<&str>) -> String {
    format!(
        "☀️ <b>定时开机完成</b>\n服务器 {} 已重建\nIP: {}",
        escape(name),
        ip.unwrap_or("-")
    )
}

pub fn action_result(name: &str, ok: bool, done: &str, failed: &str) -> String {
    if ok {
        format!("✅ 服务器 <b>{}</b> {done}", escape(name))
    } else {
        format!("❌ 服务器 <b>{}</b> {failed}", escape(name))
    }
}
