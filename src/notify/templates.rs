//! Message templates and rendering.
//!
//! Placeholders are `{name}` with lowercase ASCII names. Every placeholder
//! must have a value; optional fields are supplied as empty strings by the
//! caller (see [`appointment_data`]).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{MessageType, NotifyError, Priority, TemplateData};
use crate::booking::Appointment;
use crate::types::Participant;

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{([a-z][a-z0-9_]*)\}").ok());

/// One message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Body with `{placeholder}` markers.
    pub body: String,
    /// Delivery priority.
    pub priority: Priority,
}

impl Template {
    fn new(body: &str, priority: Priority) -> Self {
        Self {
            body: body.to_owned(),
            priority,
        }
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let Some(re) = PLACEHOLDER.as_ref() else {
            return Vec::new();
        };
        let mut names: Vec<String> = Vec::new();
        for caps in re.captures_iter(&self.body) {
            let name = &caps[1];
            if !names.iter().any(|n| n == name) {
                names.push(name.to_owned());
            }
        }
        names
    }
}

/// Fixed mapping from message type to template, loaded once at startup.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: HashMap<MessageType, Template>,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateSet {
    /// The built-in templates.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        for message_type in MessageType::ALL {
            templates.insert(message_type, builtin_template(message_type));
        }
        Self { templates }
    }

    /// Replace the body and/or priority of one template.
    pub fn register(&mut self, message_type: MessageType, template: Template) {
        self.templates.insert(message_type, template);
    }

    /// Override parts of a template, keeping the rest.
    pub fn override_template(
        &mut self,
        message_type: MessageType,
        body: Option<String>,
        priority: Option<Priority>,
    ) {
        let current = self.get(message_type);
        let template = Template {
            body: body.unwrap_or(current.body),
            priority: priority.unwrap_or(current.priority),
        };
        self.register(message_type, template);
    }

    /// Template for a message type.
    pub fn get(&self, message_type: MessageType) -> Template {
        self.templates
            .get(&message_type)
            .cloned()
            .unwrap_or_else(|| builtin_template(message_type))
    }

    /// Priority declared for a message type.
    pub fn priority(&self, message_type: MessageType) -> Priority {
        self.templates
            .get(&message_type)
            .map_or_else(|| builtin_template(message_type).priority, |t| t.priority)
    }

    /// Render a message type with the given data.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::MissingTemplateData`] naming the first
    /// placeholder with no value in `data`.
    pub fn render(
        &self,
        message_type: MessageType,
        data: &TemplateData,
    ) -> Result<String, NotifyError> {
        let template = self.get(message_type);
        render_body(&template.body, data).map_err(|field| NotifyError::MissingTemplateData {
            message_type,
            field,
        })
    }
}

/// Substitute placeholders in `body`. Returns the first missing name on failure.
fn render_body(body: &str, data: &TemplateData) -> Result<String, String> {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return Ok(body.to_owned());
    };

    if let Some(missing) = re
        .captures_iter(body)
        .map(|caps| caps[1].to_owned())
        .find(|name| !data.contains_key(name))
    {
        return Err(missing);
    }

    Ok(re
        .replace_all(body, |caps: &regex::Captures<'_>| {
            data.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

/// Placeholder values describing an appointment, shared by every
/// appointment-related template. `extra_services` defaults to empty.
pub fn appointment_data(
    appointment: &Appointment,
    client: &Participant,
    provider: &Participant,
) -> TemplateData {
    let description = if appointment.service.description.trim().is_empty() {
        "No additional details".to_owned()
    } else {
        appointment.service.description.clone()
    };
    let mut data = TemplateData::new();
    data.insert("appointment_id".into(), appointment.id.to_string());
    data.insert("client_name".into(), client.name.clone());
    data.insert("client_phone".into(), client.phone.clone());
    data.insert("appointment_date".into(), appointment.date_label());
    data.insert("appointment_time".into(), appointment.time_label());
    data.insert("service_name".into(), appointment.service.summary());
    data.insert(
        "duration_minutes".into(),
        appointment.service.duration_minutes.to_string(),
    );
    data.insert("provider_name".into(), provider.name.clone());
    data.insert("description".into(), description);
    data.insert("extra_services".into(), String::new());
    data
}

fn builtin_template(message_type: MessageType) -> Template {
    match message_type {
        MessageType::CoordinatorApprovalRequest => Template::new(
            "New booking request #{appointment_id}\n\n\
             Client: {client_name} ({client_phone})\n\
             Date: {appointment_date}\n\
             Time: {appointment_time}\n\
             Service: {service_name}\n\
             Therapist: {provider_name}\n\
             Details: {description}{extra_services}\n\n\
             Reply with:\n\
             APPROVE {appointment_id}\n\
             DECLINE {appointment_id}\n\
             MODIFY {appointment_id} [what should change]",
            Priority::High,
        ),
        MessageType::ClientConfirmation => Template::new(
            "Hello {client_name}, your appointment is confirmed.\n\n\
             Date: {appointment_date}\n\
             Time: {appointment_time}\n\
             Service: {service_name}\n\
             Booking reference: #{appointment_id}\n\n\
             We look forward to seeing you.",
            Priority::High,
        ),
        MessageType::ClientDeclineNotification => Template::new(
            "Hello {client_name}, we are sorry but we cannot accommodate booking \
             #{appointment_id} on {appointment_date} at {appointment_time}.\n\n\
             Reply here and we will help you find another time.",
            Priority::High,
        ),
        MessageType::ClientModificationRequest => Template::new(
            "Hello {client_name}, our coordinator needs a change to booking \
             #{appointment_id} before it can be confirmed:\n\n\
             {modification_reason}\n\n\
             Reply here with what works for you.",
            Priority::Normal,
        ),
        MessageType::CoordinatorFeedback => {
            Template::new("{action_result}\n{delivery_status}", Priority::Normal)
        }
        MessageType::CoordinatorClarification => Template::new(
            "I could not tell what to do with: \"{raw_message}\"\n\n\
             Please reply with one of:\n\
             APPROVE or YES to confirm the latest booking\n\
             DECLINE or NO to decline it\n\
             CHANGE or MODIFY [reason] to ask the client for changes\n\n\
             Add the booking number to target a specific request, e.g. APPROVE 42.",
            Priority::Normal,
        ),
        MessageType::ClientEscalation => Template::new(
            "Client escalation ({reason})\n\n\
             Client: {client_name} ({client_phone})\n\
             Message: \"{client_message}\"\n\
             {context}\n\n\
             Reply with RECOMMENDATION: [your guidance] and I will draft a \
             response for your review.",
            Priority::High,
        ),
        MessageType::RecommendationReview => Template::new(
            "Final confirmation required before sending to {client_name} \
             ({client_phone}):\n\n\
             ---\n{prepared_response}\n---\n\n\
             Reply APPROVE to send this to {client_name}, REVISE: [changes] to \
             edit, or DECLINE to withdraw and offer a consultation instead. \
             To decide a booking while this draft is open, include its \
             number, e.g. APPROVE 12.",
            Priority::High,
        ),
        MessageType::ClientGuidance => Template::new(
            "Hello {client_name},\n\n\
             Thank you for your patience. Our therapist has reviewed your request:\n\n\
             {guidance}\n\n\
             Reply here if you would like to book or have more questions.",
            Priority::Normal,
        ),
        MessageType::ClientConsultationOffer => Template::new(
            "Hello {client_name}, your request needs a closer look than we can \
             give over chat. We would be glad to arrange a short consultation \
             with one of our therapists. Reply here with a convenient time.",
            Priority::Normal,
        ),
        MessageType::ConversationReply => Template::new("{text}", Priority::Normal),
        MessageType::ServiceUnavailable => Template::new(
            "Sorry, we could not process your message right now. \
             Please try again shortly.",
            Priority::Low,
        ),
    }
}
