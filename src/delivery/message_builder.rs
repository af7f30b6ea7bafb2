//! MarkdownV2 message bodies sent to subscribers.

use crate::air_quality::AirQualityReading;
use crate::air_quality::category::AqiCategory;
use crate::delivery::markdown::escape_markdown_v2 as esc;
use crate::entity::AqiThreshold;
use crate::entity::SubscriptionModel;

/// Alert sent by the notification cycle.
pub fn notification_message(location: &str, aqi: i32, local_time: &str) -> String {
    let category = AqiCategory::from_aqi(aqi);
    format!(
        "🔔 *Air quality alert*\n\n\
         *Location:* {}\n\
         *Current AQI:* `{}` {} \\({}\\)\n\
         📅 Data time: `{}`\n\n\
         {}",
        esc(location),
        aqi,
        category.emoji(),
        esc(category.label()),
        esc(local_time),
        esc("ℹ️ Request the air quality report for details."),
    )
}

/// Full report for an on-demand air quality request.
pub fn report_message(location: &str, reading: &AirQualityReading, attribution: &str) -> String {
    let mut text = format!("*Air quality for {}*\n", esc(location));
    text.push_str(&format!("📅 Data time: `{}`\n\n", esc(&reading.local_time)));

    match reading.overall_aqi {
        Some(aqi) => {
            let category = AqiCategory::from_aqi(aqi);
            text.push_str(&format!(
                "*Overall AQI:* `{}` {} \\({}\\)\n",
                aqi,
                category.emoji(),
                esc(category.label())
            ));
        }
        None => text.push_str(&format!("*Overall AQI:* {}\n", esc("not reported"))),
    }

    if !reading.pollutants.is_empty() {
        text.push_str("\n*Main pollutants:*\n");
        for (pollutant, value) in &reading.pollutants {
            text.push_str(&format!(
                "  • *{}*: `{}`\n",
                esc(pollutant.code()),
                esc(&value.to_string())
            ));
        }
    }

    if let Some(aqi) = reading.overall_aqi {
        text.push('\n');
        text.push_str(&esc(AqiCategory::from_aqi(aqi).recommendation()));
        text.push('\n');
    }

    text.push('\n');
    text.push_str(&esc(&format!("ℹ️ {}.", attribution)));
    text
}

/// Asks for a threshold after the subscribe dialogue accepted a location.
pub fn threshold_prompt(location: &str, current_aqi: Option<i32>) -> String {
    let current = match current_aqi {
        Some(aqi) => {
            let category = AqiCategory::from_aqi(aqi);
            format!(
                "📊 AQI in {}: *{}* \\({} {}\\)\n",
                esc(location),
                aqi,
                esc(category.label()),
                category.emoji()
            )
        }
        None => format!(
            "{}\n",
            esc("⚠️ Current AQI is unavailable. You can still set a threshold or /cancel.")
        ),
    };
    format!(
        "{}💬 Send the AQI value above which you want to be notified\\.\n\
         For example *100*, or *0* for all significant changes\\.",
        current
    )
}

/// Confirmation and "my subscription" view.
pub fn subscription_summary(subscription: &SubscriptionModel) -> String {
    let threshold = match subscription.threshold {
        AqiThreshold::Fixed(value) => format!("*{}*", value),
        AqiThreshold::AnyChange => esc("all significant changes"),
    };
    let status = if subscription.is_active {
        "active"
    } else {
        "paused"
    };
    format!(
        "📍 Location: *{}*\n📈 Notify from AQI: {}\n🔔 Status: {}",
        esc(&subscription.location_label()),
        threshold,
        status
    )
}
