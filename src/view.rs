//! HTML rendering for the three flow steps.

use chrono::{TimeZone, Utc};

use crate::backend::{Alert, CoinPrediction, Direction, PredictionSet};
use crate::flow::{DashboardData, ALERT_PRESETS, MIN_ALERT_PERCENT, OTP_LENGTH};
use crate::session::{Notice, Session, Step, ALL_WINDOWS};

const SYMBOL_SUGGESTIONS: [&str; 6] = ["BTC", "ETH", "SOL", "XRP", "BNB", "DOGE"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinTile {
    pub symbol: String,
    pub price: String,
    pub change: String,
    pub change_class: &'static str,
    pub indicator: &'static str,
    pub direction_class: &'static str,
    pub confidence: String,
}

pub struct PageContext<'a> {
    pub session: &'a Session,
    pub notices: &'a [Notice],
    pub dashboard: Option<&'a DashboardData>,
    pub auto_refresh_secs: u64,
}

pub fn format_price(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if negative_after_rounding(value, &fixed) { "-" } else { "" };
    format!("{sign}${grouped}.{frac_part}")
}

pub fn format_change(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let sign = if negative_after_rounding(value, &fixed) { '-' } else { '+' };
    format!("{sign}{fixed}%")
}

/// `fixed` is the rounded magnitude; values that round to zero carry no minus sign.
fn negative_after_rounding(value: f64, fixed: &str) -> bool {
    value < 0.0 && fixed.bytes().any(|b| matches!(b, b'1'..=b'9'))
}

pub fn format_confidence(value: f64) -> String {
    format!("{value:.1}%")
}

/// Alert thresholds keep their precision but always show a decimal.
pub fn format_alert_percent(value: f64) -> String {
    let raw = value.to_string();
    if raw.contains('.') {
        format!("{raw}%")
    } else {
        format!("{raw}.0%")
    }
}

pub fn direction_indicator(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Up => ("up", "▲"),
        Direction::Down => ("down", "▼"),
    }
}

pub fn coin_tile(coin: &CoinPrediction) -> CoinTile {
    let (direction_class, indicator) = direction_indicator(coin.prediction);
    let change = format_change(coin.change);
    CoinTile {
        symbol: coin.symbol.clone(),
        price: format_price(coin.price),
        change_class: if change.starts_with('-') { "down" } else { "up" },
        change,
        indicator,
        direction_class,
        confidence: format_confidence(coin.confidence),
    }
}

pub fn timestamp_label(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Number(number) => {
            let secs = number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f as i64))?;
            Utc.timestamp_opt(secs, 0)
                .single()
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        }
        _ => None,
    }
}

pub fn render_page(ctx: &PageContext<'_>) -> String {
    let session = ctx.session;
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    if session.step == Step::Dashboard && session.auto_refresh {
        out.push_str(&format!(
            "<meta http-equiv=\"refresh\" content=\"{}\">\n",
            ctx.auto_refresh_secs
        ));
    }
    out.push_str("<title>AI Crypto Predictor</title>\n");
    out.push_str("<style>body{margin:0;font-family:\"Segoe UI\",sans-serif}body.dark{background:#0d1117;color:#f0f6fc}body.light{background:#f6f8fa;color:#1f2328}.shell{max-width:960px;margin:0 auto;padding:24px}.card{border:1px solid #30363d;border-radius:12px;padding:16px;margin-top:16px}.tiles{display:grid;grid-template-columns:repeat(auto-fill,minmax(200px,1fr));gap:12px}.tile{border:1px solid #30363d;border-radius:10px;padding:12px}.up{color:#2ea043}.down{color:#f85149}.notice{padding:8px 12px;border-radius:8px;margin-top:8px}.notice-success{background:#1f6f3f33}.notice-info{background:#1f4f6f33}.notice-warning{background:#9e6a0333}.notice-error{background:#8e151533}.pro{font-size:.7rem;border:1px solid currentColor;border-radius:6px;padding:1px 5px}form.inline{display:inline}</style>\n");
    out.push_str(&format!(
        "</head><body class=\"{}\"><main class=\"shell\">\n",
        session.theme.as_str()
    ));

    for notice in ctx.notices {
        out.push_str(&format!(
            "<div class=\"notice notice-{}\">{}</div>\n",
            notice.level.as_str(),
            escape_html(&notice.message)
        ));
    }

    match session.step {
        Step::Email => render_email_step(&mut out),
        Step::Otp => render_otp_step(&mut out, session),
        Step::Dashboard => render_dashboard_step(&mut out, session, ctx.dashboard),
    }

    out.push_str(&format!(
        "<form class=\"inline\" method=\"post\" action=\"/theme\"><input type=\"hidden\" name=\"theme\" value=\"{}\"><button>Switch to {} theme</button></form>\n",
        session.theme.toggled().as_str(),
        session.theme.toggled().as_str()
    ));
    out.push_str("</main></body></html>\n");
    out
}

fn render_email_step(out: &mut String) {
    out.push_str("<h1>AI Crypto Login</h1>\n");
    out.push_str("<p>Enter your email to receive a one-time password (OTP).</p>\n");
    out.push_str("<form id=\"email-form\" method=\"post\" action=\"/login/send-otp\">");
    out.push_str("<input type=\"email\" name=\"email\" placeholder=\"you@example.com\">");
    out.push_str("<button>Send OTP</button></form>\n");
}

fn render_otp_step(out: &mut String, session: &Session) {
    out.push_str("<h1>AI Crypto Login</h1>\n");
    out.push_str(&format!(
        "<p>OTP sent to: <b>{}</b></p>\n",
        escape_html(&session.email)
    ));
    out.push_str("<form id=\"otp-form\" method=\"post\" action=\"/login/verify-otp\">");
    out.push_str(&format!(
        "<input name=\"otp\" maxlength=\"{OTP_LENGTH}\" autocomplete=\"one-time-code\">"
    ));
    out.push_str("<label><input type=\"checkbox\" name=\"stay_logged_in\" value=\"on\" checked> Stay logged in</label>");
    out.push_str("<button>Verify OTP</button></form>\n");
    out.push_str("<form class=\"inline\" method=\"post\" action=\"/login/resend\"><button>Resend OTP</button></form>\n");
    out.push_str("<form class=\"inline\" method=\"post\" action=\"/login/change-email\"><button>Use a different email</button></form>\n");
}

fn render_dashboard_step(out: &mut String, session: &Session, data: Option<&DashboardData>) {
    out.push_str("<h1>AI Crypto Predictor Dashboard</h1>\n");
    out.push_str(&format!("<p>Welcome, {}", escape_html(&session.email)));
    if session.pro {
        out.push_str(" <span class=\"pro\">PRO</span>");
    }
    out.push_str("</p>\n");

    out.push_str("<form class=\"inline\" method=\"post\" action=\"/dashboard/window\"><select name=\"window\">");
    for window in ALL_WINDOWS {
        let selected = if window == session.window { " selected" } else { "" };
        out.push_str(&format!(
            "<option value=\"{0}\"{selected}>{0}</option>",
            window.as_str()
        ));
    }
    out.push_str("</select><button>Apply window</button></form>\n");
    out.push_str("<form class=\"inline\" method=\"post\" action=\"/dashboard/refresh\"><button>Refresh</button></form>\n");
    out.push_str(&format!(
        "<form class=\"inline\" method=\"post\" action=\"/dashboard/auto-refresh\"><input type=\"hidden\" name=\"enabled\" value=\"{}\"><button>{}</button></form>\n",
        if session.auto_refresh { "off" } else { "on" },
        if session.auto_refresh {
            "Stop auto-refresh"
        } else {
            "Start auto-refresh"
        }
    ));

    out.push_str("<section class=\"card\" id=\"predictions\"><h2>Predictions</h2>\n");
    match data.map(|d| &d.predictions) {
        Some(Ok(set)) => render_predictions(out, set),
        Some(Err(failure)) => out.push_str(&format!(
            "<div class=\"notice notice-error\">{}</div>\n",
            escape_html(&failure.message)
        )),
        None => out.push_str("<p>No data loaded.</p>\n"),
    }
    out.push_str("</section>\n");

    out.push_str("<section class=\"card\" id=\"alerts\"><h2>Alerts</h2>\n");
    match data.map(|d| &d.alerts) {
        Some(Ok(alerts)) => render_alert_list(out, alerts),
        Some(Err(failure)) => out.push_str(&format!(
            "<div class=\"notice notice-error\">{}</div>\n",
            escape_html(&failure.message)
        )),
        None => {}
    }
    render_add_alert_form(out);
    out.push_str("</section>\n");

    if session.stay_logged_in {
        out.push_str("<form class=\"inline\" method=\"post\" action=\"/saved-login/reset\"><button>Forget this browser</button></form>\n");
    }
    out.push_str("<form class=\"inline\" method=\"post\" action=\"/logout\"><button>Logout</button></form>\n");
}

fn render_predictions(out: &mut String, set: &PredictionSet) {
    if set.stale {
        out.push_str("<div class=\"notice notice-warning\">Predictions may be out of date.</div>\n");
    }
    if let Some(error) = &set.error {
        out.push_str(&format!(
            "<div class=\"notice notice-warning\">{}</div>\n",
            escape_html(error)
        ));
    }
    if set.coins.is_empty() {
        out.push_str("<p>No predictions available.</p>\n");
    }

    out.push_str("<div class=\"tiles\">\n");
    for coin in &set.coins {
        let tile = coin_tile(coin);
        out.push_str(&format!(
            "<div class=\"tile\" data-symbol=\"{symbol}\"><h3>{symbol}</h3><div class=\"price\">{price}</div><div class=\"change {change_class}\">{change}</div><div class=\"prediction {direction_class}\">{indicator} {direction} · {confidence}</div></div>\n",
            symbol = escape_html(&tile.symbol),
            price = tile.price,
            change_class = tile.change_class,
            change = tile.change,
            direction_class = tile.direction_class,
            indicator = tile.indicator,
            direction = coin.prediction.as_str(),
            confidence = tile.confidence,
        ));
    }
    out.push_str("</div>\n");

    let updated = set.timestamp.as_ref().and_then(timestamp_label);
    if let Some(updated) = updated {
        out.push_str(&format!(
            "<p class=\"updated\">Updated: {}</p>\n",
            escape_html(&updated)
        ));
    }
}

fn render_alert_list(out: &mut String, alerts: &[Alert]) {
    if alerts.is_empty() {
        out.push_str("<p>No alerts yet.</p>\n");
        return;
    }

    out.push_str("<ul class=\"alert-list\">\n");
    for alert in alerts {
        let (class, indicator) = direction_indicator(alert.direction);
        out.push_str(&format!(
            "<li><b>{symbol}</b> <span class=\"{class}\">{indicator} {direction}</span> {percent} <form class=\"inline\" method=\"post\" action=\"/alerts/delete\"><input type=\"hidden\" name=\"symbol\" value=\"{symbol}\"><input type=\"hidden\" name=\"direction\" value=\"{direction}\"><input type=\"hidden\" name=\"percent\" value=\"{raw_percent}\"><button>Delete</button></form></li>\n",
            symbol = escape_html(&alert.symbol),
            direction = alert.direction.as_str(),
            percent = format_alert_percent(alert.percent),
            raw_percent = alert.percent,
        ));
    }
    out.push_str("</ul>\n");
}

fn render_add_alert_form(out: &mut String) {
    out.push_str("<form id=\"add-alert\" method=\"post\" action=\"/alerts/add\">");
    out.push_str("<input name=\"symbol\" list=\"symbols\" placeholder=\"BTC\"><datalist id=\"symbols\">");
    for symbol in SYMBOL_SUGGESTIONS {
        out.push_str(&format!("<option value=\"{symbol}\">"));
    }
    out.push_str("</datalist><select name=\"direction\"><option value=\"UP\">UP</option><option value=\"DOWN\">DOWN</option></select>");
    out.push_str("<select name=\"preset\">");
    for preset in ALERT_PRESETS {
        out.push_str(&format!(
            "<option value=\"{preset}\">{}</option>",
            format_alert_percent(preset)
        ));
    }
    out.push_str("<option value=\"custom\">Custom</option></select>");
    out.push_str(&format!(
        "<input name=\"custom\" type=\"number\" step=\"0.1\" min=\"{MIN_ALERT_PERCENT}\" placeholder=\"custom %\">"
    ));
    out.push_str("<button>Add alert</button></form>\n");
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ApiFailure, FailureKind};

    fn btc() -> CoinPrediction {
        serde_json::from_str(
            r#"{"symbol":"BTC","price":65000.12,"change":-1.5,"prediction":"DOWN","confidence":72.0}"#,
        )
        .unwrap()
    }

    fn dashboard_session() -> Session {
        Session {
            step: Step::Dashboard,
            email: "trader@example.com".to_string(),
            verified: true,
            ..Session::default()
        }
    }

    #[test]
    fn price_uses_thousands_separators() {
        assert_eq!(format_price(65000.12), "$65,000.12");
        assert_eq!(format_price(1_234_567.891), "$1,234,567.89");
        assert_eq!(format_price(999.5), "$999.50");
        assert_eq!(format_price(0.5234), "$0.52");
        assert_eq!(format_price(-1000.0), "-$1,000.00");
        assert_eq!(format_price(-0.004), "$0.00");
        assert_eq!(format_price(-0.005001), "-$0.01");
    }

    #[test]
    fn change_and_confidence_formats() {
        assert_eq!(format_change(-1.5), "-1.50%");
        assert_eq!(format_change(2.0), "+2.00%");
        assert_eq!(format_change(-0.001), "+0.00%");
        assert_eq!(format_change(-0.0), "+0.00%");
        assert_eq!(format_confidence(72.0), "72.0%");
        assert_eq!(format_alert_percent(5.0), "5.0%");
        assert_eq!(format_alert_percent(2.5), "2.5%");
    }

    #[test]
    fn btc_tile_shows_down_indicator() {
        let tile = coin_tile(&btc());
        assert_eq!(tile.price, "$65,000.12");
        assert_eq!(tile.change, "-1.50%");
        assert_eq!(tile.change_class, "down");
        assert_eq!(tile.direction_class, "down");
        assert_eq!(tile.indicator, "▼");
        assert_eq!(tile.confidence, "72.0%");
    }

    #[test]
    fn tiny_negative_change_is_shown_flat() {
        let tile = coin_tile(&CoinPrediction {
            change: -0.001,
            ..btc()
        });
        assert_eq!(tile.change, "+0.00%");
        assert_eq!(tile.change_class, "up");
    }

    #[test]
    fn forget_browser_button_follows_saved_login() {
        let render = |session: &Session| {
            render_page(&PageContext {
                session,
                notices: &[],
                dashboard: None,
                auto_refresh_secs: 60,
            })
        };

        assert!(!render(&dashboard_session()).contains("Forget this browser"));
        let saved = Session {
            stay_logged_in: true,
            ..dashboard_session()
        };
        assert!(render(&saved).contains("Forget this browser"));
    }

    #[test]
    fn numeric_and_text_timestamps_are_labelled() {
        assert_eq!(
            timestamp_label(&serde_json::json!(0)).as_deref(),
            Some("1970-01-01 00:00:00 UTC")
        );
        assert_eq!(
            timestamp_label(&serde_json::json!("12:00 UTC")).as_deref(),
            Some("12:00 UTC")
        );
        assert_eq!(timestamp_label(&serde_json::json!(null)), None);
    }

    #[test]
    fn dashboard_page_renders_tiles_alerts_and_warnings() {
        let session = dashboard_session();
        let data = DashboardData {
            predictions: Ok(PredictionSet {
                coins: vec![btc()],
                stale: true,
                ..PredictionSet::default()
            }),
            alerts: Ok(vec![Alert::new("BTC", Direction::Up, 5.0)]),
        };

        let html = render_page(&PageContext {
            session: &session,
            notices: &[],
            dashboard: Some(&data),
            auto_refresh_secs: 60,
        });

        assert!(html.contains("$65,000.12"));
        assert!(html.contains("-1.50%"));
        assert!(html.contains("▼ DOWN · 72.0%"));
        assert!(html.contains("out of date"));
        assert!(html.contains("name=\"percent\" value=\"5\""));
        assert!(html.contains("5.0%"));
        assert!(!html.contains("http-equiv=\"refresh\""));
    }

    #[test]
    fn failed_fetch_is_rendered_inline() {
        let session = Session {
            auto_refresh: true,
            ..dashboard_session()
        };
        let failure = ApiFailure::new(FailureKind::Transport, "backend <down>");
        let data = DashboardData {
            predictions: Err(failure.clone()),
            alerts: Err(failure),
        };

        let html = render_page(&PageContext {
            session: &session,
            notices: &[Notice::error("oops")],
            dashboard: Some(&data),
            auto_refresh_secs: 30,
        });

        assert!(html.contains("backend &lt;down&gt;"));
        assert!(html.contains("notice-error\">oops"));
        assert!(html.contains("content=\"30\""));
    }

    #[test]
    fn login_steps_render_their_forms() {
        let email_html = render_page(&PageContext {
            session: &Session::default(),
            notices: &[],
            dashboard: None,
            auto_refresh_secs: 60,
        });
        assert!(email_html.contains("email-form"));
        assert!(email_html.contains("class=\"dark\""));

        let session = Session {
            step: Step::Otp,
            email: "a<b>@example.com".to_string(),
            ..Session::default()
        };
        let otp_html = render_page(&PageContext {
            session: &session,
            notices: &[],
            dashboard: None,
            auto_refresh_secs: 60,
        });
        assert!(otp_html.contains("otp-form"));
        assert!(otp_html.contains("a&lt;b&gt;@example.com"));
        assert!(otp_html.contains("/login/resend"));
    }
}
