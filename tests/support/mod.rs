//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime};
use sqlx::SqlitePool;

use carebook::booking::ledger::{AppointmentLedger, NewAppointment};
use carebook::booking::rules::BookingRules;
use carebook::booking::{Appointment, ServiceDescriptor, ServiceKind};
use carebook::notify::dispatcher::{Dispatcher, DEFAULT_SEND_TIMEOUT};
use carebook::notify::templates::TemplateSet;
use carebook::notify::{MessageSender, SendReceipt, TransportError};
use carebook::store::{self, participants};
use carebook::types::{Participant, Role};

pub const COORDINATOR_PHONE: &str = "+974 5500 0001";
pub const COORDINATOR_KEY: &str = "97455000001";
pub const THERAPIST_PHONE: &str = "97455000002";
pub const CLIENT_PHONE: &str = "whatsapp:+97455123456";
pub const CLIENT_KEY: &str = "97455123456";

/// Records every send and answers with a sequential transport id.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sender lock").clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == recipient)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
    ) -> Result<SendReceipt, TransportError> {
        let mut sent = self.sent.lock().expect("sender lock");
        sent.push((recipient.to_owned(), text.to_owned()));
        Ok(SendReceipt {
            transport_message_id: Some(format!("msg-{}", sent.len())),
        })
    }
}

/// Rejects every send.
pub struct FailingSender;

#[async_trait]
impl MessageSender for FailingSender {
    async fn send_message(
        &self,
        _recipient: &str,
        _text: &str,
    ) -> Result<SendReceipt, TransportError> {
        Err(TransportError("bridge rejected the message".to_owned()))
    }
}

/// Sleeps before succeeding.
pub struct SlowSender(pub Duration);

#[async_trait]
impl MessageSender for SlowSender {
    async fn send_message(
        &self,
        _recipient: &str,
        _text: &str,
    ) -> Result<SendReceipt, TransportError> {
        tokio::time::sleep(self.0).await;
        Ok(SendReceipt {
            transport_message_id: None,
        })
    }
}

pub async fn db() -> SqlitePool {
    store::open_in_memory()
        .await
        .expect("in-memory store should open")
}

/// A file-backed store with a multi-connection pool, for tests that need
/// statements from different connections to interleave.
pub async fn file_db(dir: &tempfile::TempDir) -> SqlitePool {
    store::open(&dir.path().join("carebook.db"))
        .await
        .expect("file store should open")
}

pub async fn therapist(db: &SqlitePool) -> Participant {
    participants::get_or_create_participant(db, THERAPIST_PHONE, Role::Therapist, Some("Layla"))
        .await
        .expect("therapist should be created")
}

pub async fn client(db: &SqlitePool) -> Participant {
    participants::get_or_create_participant(db, CLIENT_PHONE, Role::Client, Some("Sara"))
        .await
        .expect("client should be created")
}

pub fn ledger(db: &SqlitePool) -> Arc<AppointmentLedger> {
    Arc::new(AppointmentLedger::new(db.clone(), BookingRules::default()))
}

pub fn dispatcher(sender: Arc<dyn MessageSender>) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        sender,
        TemplateSet::builtin(),
        DEFAULT_SEND_TIMEOUT,
    ))
}

/// Tomorrow at `hour:00`, clinic-local.
pub fn tomorrow_at(hour: u32) -> NaiveDateTime {
    let day = Local::now()
        .date_naive()
        .succ_opt()
        .expect("tomorrow should exist");
    day.and_time(NaiveTime::from_hms_opt(hour, 0, 0).expect("valid hour"))
}

pub fn massage(minutes: u32) -> ServiceDescriptor {
    ServiceDescriptor {
        kind: ServiceKind::InCall,
        duration_minutes: minutes,
        description: "Deep tissue".to_owned(),
    }
}

/// A pending booking for the standard client with the standard therapist.
pub async fn pending_booking(
    ledger: &AppointmentLedger,
    client: &Participant,
    therapist: &Participant,
    hour: u32,
) -> Appointment {
    ledger
        .create(NewAppointment {
            client_id: client.id,
            provider_id: therapist.id,
            service: massage(60),
            requested_datetime: tomorrow_at(hour),
            client_notes: None,
        })
        .await
        .expect("booking should be created")
}
