//! Recovery email rendering.
//!
//! Deliberately plain: one layout, with the copy driven by
//! [`RecoverySettings`]. All customer- and merchant-supplied text is escaped
//! before it is placed into HTML.

use std::fmt::Write as _;

use crate::{cart::AbandonedCart, settings::RecoverySettings};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_money(value: f64, currency: &str) -> String {
    format!("{value:.2} {currency}")
}

fn subject_for(email_number: u32, store: &str) -> String {
    match email_number {
        1 => format!("You left something in your cart at {store}"),
        2 => format!("Your cart at {store} is still waiting"),
        _ => format!("Last chance to complete your order at {store}"),
    }
}

fn greeting(cart: &AbandonedCart) -> String {
    match cart
        .customer_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        Some(name) => format!("Hi {name},"),
        None => "Hi there,".to_string(),
    }
}

/// Render the `email_number`-th recovery email for `cart`.
///
/// The caller guarantees `cart.checkout_url` is present; an absent URL
/// renders an empty link rather than failing.
pub fn render_recovery_email(
    settings: &RecoverySettings,
    cart: &AbandonedCart,
    email_number: u32,
) -> RenderedEmail {
    let store = settings
        .store_name
        .as_deref()
        .or(settings.sender_name.as_deref())
        .unwrap_or("our store");
    let subject = subject_for(email_number, store);
    let checkout_url = cart.checkout_url.as_deref().unwrap_or_default();
    let message = settings
        .custom_message
        .as_deref()
        .unwrap_or("We saved the items in your cart. Complete your order whenever you are ready.");
    let total = format_money(cart.total_value, &cart.currency);

    let mut text = String::new();
    let _ = writeln!(text, "{}", greeting(cart));
    let _ = writeln!(text);
    let _ = writeln!(text, "{message}");
    let _ = writeln!(text);
    for item in &cart.cart_items {
        let _ = writeln!(
            text,
            "- {} x{} ({})",
            item.title,
            item.quantity,
            format_money(item.subtotal(), &cart.currency)
        );
    }
    let _ = writeln!(text, "Total: {total}");
    if let Some(code) = settings.discount_code.as_deref() {
        let _ = writeln!(text);
        let _ = writeln!(text, "Use code {code} at checkout.");
    }
    let _ = writeln!(text);
    let _ = writeln!(text, "Complete your order: {checkout_url}");

    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><body style=\"font-family:sans-serif\">");
    if let Some(logo) = settings.logo_url.as_deref() {
        let _ = write!(
            html,
            "<img src=\"{}\" alt=\"{}\" style=\"max-height:48px\">",
            escape_html(logo),
            escape_html(store)
        );
    }
    let _ = write!(html, "<p>{}</p>", escape_html(&greeting(cart)));
    let _ = write!(html, "<p>{}</p>", escape_html(message));
    html.push_str("<table>");
    for item in &cart.cart_items {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>x{}</td><td>{}</td></tr>",
            escape_html(&item.title),
            item.quantity,
            escape_html(&format_money(item.subtotal(), &cart.currency))
        );
    }
    let _ = write!(
        html,
        "<tr><td colspan=\"2\"><strong>Total</strong></td><td><strong>{}</strong></td></tr>",
        escape_html(&total)
    );
    html.push_str("</table>");
    if let Some(code) = settings.discount_code.as_deref() {
        let _ = write!(
            html,
            "<p>Use code <strong>{}</strong> at checkout.</p>",
            escape_html(code)
        );
    }
    let _ = write!(
        html,
        "<p><a href=\"{}\">Complete your order</a></p></body></html>",
        escape_html(checkout_url)
    );

    RenderedEmail {
        subject,
        html_body: html,
        text_body: text,
    }
}
