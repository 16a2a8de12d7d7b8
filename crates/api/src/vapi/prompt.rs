//! Receptionist persona: voice ids and the system prompt

use callally_shared::Business;

pub const DEFAULT_VOICE: &str = "rachel";

/// ElevenLabs voice id for a persona name. Unknown names fall back to rachel.
pub fn voice_id(persona: &str) -> &'static str {
    match persona {
        "adam" => "pNInz6obpgDQGcFmaJgB",
        "sarah" => "EXAVITQu4vr4xnSDxMaL",
        "josh" => "TxGEqnHWrfWFTfGW9XjX",
        _ => "21m00Tcm4TlvDq8ikWAM",
    }
}

pub fn is_known_voice(persona: &str) -> bool {
    matches!(persona, "rachel" | "adam" | "sarah" | "josh")
}

pub fn first_message(business: &Business) -> String {
    format!(
        "Hi, thanks for calling {}! This is {}, how can I help you today?",
        business.name, business.agent_name
    )
}

fn emergency_instructions(business: &Business) -> String {
    if business.emergency_dispatch && !business.emergency_keywords.is_empty() {
        let phones = if business.emergency_phones.is_empty() {
            "the on-call team".to_string()
        } else {
            business.emergency_phones.join(", ")
        };
        format!(
            "If the caller mentions any of these emergency keywords: {}\n\
             1. Express concern and urgency\n\
             2. Tell them you're connecting them to an on-call technician immediately\n\
             3. Get their phone number and address if you don't have it\n\
             4. Emergency contacts: {}",
            business.emergency_keywords.join(", "),
            phones
        )
    } else {
        "For urgent situations:\n\
         1. Express understanding of the urgency\n\
         2. Get their phone number\n\
         3. Take a message and let them know someone will call back as soon as possible"
            .to_string()
    }
}

/// Build the assistant's system prompt from the business profile.
pub fn build_system_prompt(business: &Business) -> String {
    let services = business.services_description();
    let services = if services.is_empty() {
        "various services".to_string()
    } else {
        services
    };
    let appointment_types = if business.appointment_types.is_empty() {
        "general appointment".to_string()
    } else {
        business.appointment_types.join(", ")
    };

    format!(
        "You are {agent}, a friendly and professional AI receptionist for {name}.\n\
         \n\
         ## ABOUT THE BUSINESS\n\
         - Industry: {industry}\n\
         - Services offered: {services}\n\
         - Service area: {area}\n\
         - Business hours: {hours}\n\
         \n\
         ## YOUR ROLE\n\
         Answer calls warmly, collect the caller's name, phone number and address, \
         understand their needs and book appointments when appropriate.\n\
         Available appointment types: {types}\n\
         Use the bookAppointment function to book, checkAvailability to offer times \
         and getBusinessInfo for business details.\n\
         \n\
         ## EMERGENCY HANDLING\n\
         {emergency}\n\
         \n\
         ## RULES\n\
         - Be transparent that you're an AI assistant\n\
         - Don't quote prices; offer to have someone follow up with a quote\n\
         - Always end with: \"Is there anything else I can help with today?\"",
        agent = business.agent_name,
        name = business.name,
        industry = business.industry.as_deref().unwrap_or("service"),
        services = services,
        area = business.service_area.as_deref().unwrap_or("local area"),
        hours = business.business_hours,
        types = appointment_types,
        emergency = emergency_instructions(business),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn business() -> Business {
        let mut b = Business::new(Uuid::new_v4(), "Acme Plumbing", None);
        b.industry = Some("plumbing".into());
        b
    }

    #[test]
    fn test_voice_fallback() {
        assert_eq!(voice_id("adam"), "pNInz6obpgDQGcFmaJgB");
        assert_eq!(voice_id("unknown"), voice_id(DEFAULT_VOICE));
        assert!(is_known_voice("josh"));
        assert!(!is_known_voice("bob"));
    }

    #[test]
    fn test_prompt_defaults() {
        let prompt = build_system_prompt(&business());
        assert!(prompt.contains("You are Alex"));
        assert!(prompt.contains("Acme Plumbing"));
        assert!(prompt.contains("various services"));
        assert!(prompt.contains("local area"));
        assert!(prompt.contains("Weekdays: 9am-5pm, Weekends: Closed"));
        assert!(prompt.contains("general appointment"));
        assert!(prompt.contains("Take a message"));
    }

    #[test]
    fn test_prompt_with_emergency_dispatch() {
        let mut b = business();
        b.services = vec!["Drain cleaning".into()];
        b.custom_services = Some("Water heaters".into());
        b.emergency_dispatch = true;
        b.emergency_keywords = vec!["flood".into(), "burst pipe".into()];
        b.emergency_phones = vec!["+15550009999".into()];

        let prompt = build_system_prompt(&b);
        assert!(prompt.contains("Drain cleaning, Water heaters"));
        assert!(prompt.contains("flood, burst pipe"));
        assert!(prompt.contains("+15550009999"));
    }

    #[test]
    fn test_first_message() {
        assert_eq!(
            first_message(&business()),
            "Hi, thanks for calling Acme Plumbing! This is Alex, how can I help you today?"
        );
    }
}
