// src/notify/render.rs
//! HTML bodies for digests and alerts. All dynamic text is escaped.
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

use crate::model::{Candidate, MarketKind, Quote};

const STYLE: &str = "font-family:-apple-system,Segoe UI,Helvetica,Arial,sans-serif;\
    max-width:680px;margin:0 auto;color:#222;line-height:1.5";

pub fn morning_subject(industry: &str) -> String {
    format!("【{industry}】行业早报 - 今日要闻")
}

pub fn evening_subject(industry: &str) -> String {
    format!("【{industry}】行业晚报 - 今日行情")
}

fn footer(contact: &str) -> String {
    format!(
        "<hr style=\"border:none;border-top:1px solid #ddd;margin-top:24px\">\
         <p style=\"font-size:12px;color:#888\">如需调整订阅或反馈问题，请联系 \
         <a href=\"mailto:{}\">{}</a></p>",
        attr(contact),
        text(contact)
    )
}

/// Empty when there is nothing to show.
pub fn morning_html(industry: &str, items: &[Candidate], contact: &str) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut html = format!(
        "<div style=\"{STYLE}\"><h2>{} 行业早报</h2><ol style=\"padding-left:20px\">",
        text(industry)
    );
    for item in items {
        html.push_str(&format!(
            "<li style=\"margin-bottom:14px\"><a href=\"{}\" style=\"font-weight:600;color:#1a5fb4;text-decoration:none\">{}</a>\
             <div style=\"font-size:12px;color:#888\">{}</div>",
            attr(&item.url),
            text(&item.title),
            text(&item.source_name)
        ));
        if !item.summary.trim().is_empty() {
            html.push_str(&format!(
                "<div style=\"font-size:14px;color:#444\">{}</div>",
                text(item.summary.trim())
            ));
        }
        html.push_str("</li>");
    }
    html.push_str("</ol>");
    html.push_str(&footer(contact));
    html.push_str("</div>");
    html
}

fn kind_label(kind: MarketKind) -> &'static str {
    match kind {
        MarketKind::Stock => "A股",
        MarketKind::StockHk => "港股",
        MarketKind::Futures => "大宗商品",
    }
}

/// Signed percentage with two decimals, e.g. `+1.25%`.
pub fn format_change(pct: f64) -> String {
    if pct > 0.0 {
        format!("+{pct:.2}%")
    } else {
        format!("{pct:.2}%")
    }
}

/// Empty when there are no quotes.
pub fn evening_html(industry: &str, quotes: &[Quote], contact: &str) -> String {
    if quotes.is_empty() {
        return String::new();
    }
    let mut html = format!(
        "<div style=\"{STYLE}\"><h2>{} 行业晚报</h2>\
         <table style=\"border-collapse:collapse;width:100%\">\
         <tr style=\"background:#f5f5f5\"><th align=\"left\">名称</th><th align=\"left\">代码</th>\
         <th align=\"left\">类型</th><th align=\"right\">最新价</th><th align=\"right\">涨跌幅</th></tr>",
        text(industry)
    );
    for q in quotes {
        // Red for up, green for down (mainland convention).
        let color = if q.change_pct > 0.0 {
            "#c01c28"
        } else if q.change_pct < 0.0 {
            "#26a269"
        } else {
            "#555"
        };
        html.push_str(&format!(
            "<tr style=\"border-bottom:1px solid #eee\"><td>{}</td><td>{}</td><td>{}</td>\
             <td align=\"right\">{:.2}</td><td align=\"right\" style=\"color:{color}\">{}</td></tr>",
            text(&q.name),
            text(&q.symbol),
            kind_label(q.kind),
            q.price,
            format_change(q.change_pct)
        ));
    }
    html.push_str("</table>");
    html.push_str(&footer(contact));
    html.push_str("</div>");
    html
}

/// Plain alert body: a heading and pre-formatted detail lines.
pub fn alert_html(title: &str, lines: &[String]) -> String {
    let mut html = format!("<div style=\"{STYLE}\"><h3 style=\"color:#c01c28\">{}</h3><ul>", text(title));
    for l in lines {
        html.push_str(&format!("<li>{}</li>", text(l)));
    }
    html.push_str("</ul></div>");
    html
}
