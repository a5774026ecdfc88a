//! Check-in kiosk: a long-lived request loop that owns the token table.
//!
//! Requests are JSON objects, one per line, tagged by `op`:
//!
//! - `{"op":"issue","course":"C1","group":"G1"}` (optional `validity_minutes`)
//! - `{"op":"check_in","participant":"P1","token":"…"}` or `"url":"…"`
//! - `{"op":"revoke","token":"…"}`
//! - `{"op":"sweep"}`
//!
//! Every request gets exactly one JSON line back, `{"ok":true,…}` or
//! `{"ok":false,"error":{"kind":…,"message":…}}`. Tokens live only as long
//! as the loop does.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Local};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use roll_core::token::{check_in_url, token_from_url, validity_from_minutes};
use roll_core::{
    CallerContext, Clock, CourseId, ErrorKind, GroupId, SessionToken, SessionTokenStore, UserId,
    ValidationError,
};
use roll_db::{Database, DbError};

use super::util::error_kind;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Issue {
        course: CourseId,
        group: GroupId,
        #[serde(default)]
        validity_minutes: Option<i64>,
    },
    CheckIn {
        participant: UserId,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Revoke {
        token: String,
    },
    Sweep,
}

pub struct Kiosk<'a> {
    db: &'a mut Database,
    caller: CallerContext,
    clock: Arc<dyn Clock>,
    tokens: SessionTokenStore,
    base_url: Url,
    validity: Duration,
}

impl<'a> Kiosk<'a> {
    pub fn new(
        db: &'a mut Database,
        caller: CallerContext,
        clock: Arc<dyn Clock>,
        base_url: Url,
        validity: Duration,
    ) -> Self {
        Self {
            db,
            caller,
            tokens: SessionTokenStore::new(Arc::clone(&clock)),
            clock,
            base_url,
            validity,
        }
    }

    /// Handles one request line and returns its response.
    pub fn handle_line(&mut self, line: &str) -> Value {
        let result = serde_json::from_str::<Request>(line)
            .context("invalid request")
            .and_then(|request| self.handle(request));
        match result {
            Ok(mut response) => {
                response["ok"] = Value::Bool(true);
                response
            }
            Err(err) => error_response(&err),
        }
    }

    fn handle(&mut self, request: Request) -> Result<Value> {
        match request {
            Request::Issue {
                course,
                group,
                validity_minutes,
            } => self.issue(course, group, validity_minutes),
            Request::CheckIn {
                participant,
                token,
                url,
            } => {
                self.caller.authorize_check_in(&participant)?;
                let token = presented_token(token.as_deref(), url.as_deref())?;
                let binding = self.tokens.validate(&token)?;
                let now = self.clock.now();
                let today = now.with_timezone(&Local).date_naive();
                let record = self
                    .db
                    .check_in_by_token_at(&participant, &binding, &token, now, today)?;
                Ok(json!({ "op": "check_in", "record": record }))
            }
            Request::Revoke { token } => {
                let token = SessionToken::parse(&token)?;
                let revoked = self.tokens.revoke(&token);
                Ok(json!({ "op": "revoke", "revoked": revoked }))
            }
            Request::Sweep => {
                let evicted = self.tokens.sweep();
                Ok(json!({ "op": "sweep", "evicted": evicted, "outstanding": self.tokens.len() }))
            }
        }
    }

    fn issue(
        &self,
        course: CourseId,
        group: GroupId,
        validity_minutes: Option<i64>,
    ) -> Result<Value> {
        self.caller.authorize_issue(&course)?;
        if !self.db.has_course(&course)? {
            return Err(DbError::not_found("course", &course).into());
        }
        if !self.db.has_group(&group)? {
            return Err(DbError::not_found("group", &group).into());
        }
        let validity = validity_minutes.map_or(Ok(self.validity), validity_from_minutes)?;
        let issued = self
            .tokens
            .issue(course, group, self.caller.user.clone(), validity)?;
        let url = check_in_url(&self.base_url, &issued.token);

        let mut response = serde_json::to_value(&issued)?;
        response["op"] = json!("issue");
        response["url"] = json!(url.as_str());
        Ok(response)
    }
}

/// The token from either a raw `token` field or a scanned check-in link.
fn presented_token(token: Option<&str>, url: Option<&str>) -> Result<SessionToken, ValidationError> {
    match (token, url) {
        (Some(token), _) => SessionToken::parse(token),
        (None, Some(url)) => {
            let url = Url::parse(url).map_err(|_| ValidationError::MalformedToken)?;
            token_from_url(&url)
        }
        (None, None) => Err(ValidationError::MalformedToken),
    }
}

fn error_response(err: &anyhow::Error) -> Value {
    let (kind, message) = match error_kind(err) {
        Some(ErrorKind::Infrastructure) => {
            tracing::error!("kiosk request failed: {err:#}");
            (ErrorKind::Infrastructure, "internal error".to_string())
        }
        Some(kind) => (kind, format!("{err:#}")),
        None => (ErrorKind::InvalidInput, format!("{err:#}")),
    };
    tracing::debug!(kind = kind.as_str(), "kiosk request rejected");
    json!({ "ok": false, "error": { "kind": kind, "message": message } })
}

/// Serves requests from `reader` until end of input. Returns the number handled.
pub fn serve<R: BufRead, W: Write>(reader: R, writer: &mut W, kiosk: &mut Kiosk<'_>) -> Result<usize> {
    let mut handled = 0;
    for line in reader.lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = kiosk.handle_line(&line);
        serde_json::to_writer(&mut *writer, &response)?;
        writeln!(writer)?;
        writer.flush()?;
        handled += 1;
    }
    tracing::info!(handled, "kiosk input closed");
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Utc};
    use roll_core::{ManualClock, Role};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-03T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let group = GroupId::new("G1").unwrap();
        db.upsert_course(
            &CourseId::new("C1").unwrap(),
            "Compilers",
            &UserId::new("T1").unwrap(),
        )
        .unwrap();
        db.add_group(&group, "First years").unwrap();
        for participant in ["P1", "P3"] {
            db.add_group_member(&group, &UserId::new(participant).unwrap())
                .unwrap();
        }
        db
    }

    fn presenter() -> CallerContext {
        CallerContext::new(UserId::new("T1").unwrap(), Role::Presenter)
            .with_courses([CourseId::new("C1").unwrap()])
    }

    fn open_kiosk<'a>(db: &'a mut Database, caller: CallerContext, clock: &Arc<ManualClock>) -> Kiosk<'a> {
        Kiosk::new(
            db,
            caller,
            clock.clone(),
            Url::parse("https://rollcall.example/check-in").unwrap(),
            Duration::minutes(15),
        )
    }

    fn error_kind_of(response: &Value) -> &str {
        assert_eq!(response["ok"], false, "expected failure: {response}");
        response["error"]["kind"].as_str().unwrap()
    }

    fn check_in(kiosk: &mut Kiosk<'_>, participant: &str, token: &str) -> Value {
        kiosk.handle_line(
            &json!({ "op": "check_in", "participant": participant, "token": token }).to_string(),
        )
    }

    #[test]
    fn token_lifecycle_scenario() {
        let mut db = seeded();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut kiosk = open_kiosk(&mut db, presenter(), &clock);

        let issued = kiosk.handle_line(r#"{"op":"issue","course":"C1","group":"G1"}"#);
        assert_eq!(issued["ok"], true);
        assert_eq!(issued["expires_at"], "2025-03-03T08:15:00Z");
        let token = issued["token"].as_str().unwrap().to_string();
        assert_eq!(token.len(), 64);
        assert!(issued["url"].as_str().unwrap().ends_with(&format!("?token={token}")));

        clock.advance(Duration::minutes(5));
        let first = check_in(&mut kiosk, "P1", &token);
        assert_eq!(first["ok"], true);
        assert_eq!(first["record"]["status"], "present");
        assert_eq!(first["record"]["method"], "token");
        assert_eq!(first["record"]["recorded_by"], "T1");

        clock.advance(Duration::minutes(5));
        assert_eq!(error_kind_of(&check_in(&mut kiosk, "P1", &token)), "already_checked_in");
        assert_eq!(error_kind_of(&check_in(&mut kiosk, "P2", &token)), "not_enrolled");

        clock.advance(Duration::minutes(6));
        assert_eq!(error_kind_of(&check_in(&mut kiosk, "P3", &token)), "expired_token");
        assert_eq!(error_kind_of(&check_in(&mut kiosk, "P3", &token)), "invalid_token");
    }

    #[test]
    fn check_in_from_scanned_link() {
        let mut db = seeded();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut kiosk = open_kiosk(&mut db, presenter(), &clock);

        let issued = kiosk.handle_line(r#"{"op":"issue","course":"C1","group":"G1","validity_minutes":2}"#);
        assert_eq!(issued["expires_at"], "2025-03-03T08:02:00Z");
        let url = issued["url"].as_str().unwrap();
        let response = kiosk.handle_line(
            &json!({ "op": "check_in", "participant": "P1", "url": url }).to_string(),
        );
        assert_eq!(response["ok"], true);

        let response = kiosk.handle_line(
            r#"{"op":"check_in","participant":"P1","url":"https://rollcall.example/check-in"}"#,
        );
        assert_eq!(error_kind_of(&response), "invalid_token");
    }

    #[test]
    fn issue_is_authorized_and_checked() {
        let mut db = seeded();
        let clock = Arc::new(ManualClock::new(t0()));
        let outsider = CallerContext::new(UserId::new("T2").unwrap(), Role::Presenter);
        let mut kiosk = open_kiosk(&mut db, outsider, &clock);
        let response = kiosk.handle_line(r#"{"op":"issue","course":"C1","group":"G1"}"#);
        assert_eq!(error_kind_of(&response), "forbidden");

        let mut db = seeded();
        let authority = CallerContext::new(UserId::new("A1").unwrap(), Role::Authority);
        let mut kiosk = open_kiosk(&mut db, authority, &clock);
        let response = kiosk.handle_line(r#"{"op":"issue","course":"C9","group":"G1"}"#);
        assert_eq!(error_kind_of(&response), "not_found");
        let response =
            kiosk.handle_line(r#"{"op":"issue","course":"C1","group":"G1","validity_minutes":0}"#);
        assert_eq!(error_kind_of(&response), "invalid_time_window");
    }

    #[test]
    fn huge_validity_is_rejected_and_kiosk_keeps_serving() {
        let mut db = seeded();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut kiosk = open_kiosk(&mut db, presenter(), &clock);
        let issued = kiosk.handle_line(r#"{"op":"issue","course":"C1","group":"G1"}"#);
        let token = issued["token"].as_str().unwrap().to_string();

        for minutes in [1_000_000_000_000_i64, i64::MAX] {
            let response = kiosk.handle_line(
                &json!({ "op": "issue", "course": "C1", "group": "G1", "validity_minutes": minutes })
                    .to_string(),
            );
            assert_eq!(error_kind_of(&response), "invalid_time_window", "{minutes}");
        }

        let checked_in = check_in(&mut kiosk, "P1", &token);
        assert_eq!(checked_in["ok"], true, "{checked_in}");
    }

    #[test]
    fn participant_kiosk_checks_in_only_its_user() {
        let mut db = seeded();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut presenter_kiosk = open_kiosk(&mut db, presenter(), &clock);
        let issued = presenter_kiosk.handle_line(r#"{"op":"issue","course":"C1","group":"G1"}"#);
        let token = issued["token"].as_str().unwrap().to_string();
        drop(presenter_kiosk);

        // Tokens are per process, so a second kiosk cannot see the first one's table.
        let participant = CallerContext::new(UserId::new("P1").unwrap(), Role::Participant);
        let mut own = open_kiosk(&mut db, participant, &clock);
        assert_eq!(error_kind_of(&check_in(&mut own, "P3", &token)), "forbidden");
        assert_eq!(error_kind_of(&check_in(&mut own, "P1", &token)), "invalid_token");
    }

    #[test]
    fn malformed_requests_are_invalid_input() {
        let mut db = seeded();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut kiosk = open_kiosk(&mut db, presenter(), &clock);
        assert_eq!(error_kind_of(&kiosk.handle_line("not json")), "invalid_input");
        assert_eq!(error_kind_of(&kiosk.handle_line(r#"{"op":"teleport"}"#)), "invalid_input");
        assert_eq!(
            error_kind_of(&check_in(&mut kiosk, "P1", "xyz")),
            "invalid_token"
        );
    }

    #[test]
    fn revoke_and_sweep() {
        let mut db = seeded();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut kiosk = open_kiosk(&mut db, presenter(), &clock);

        let first = kiosk.handle_line(r#"{"op":"issue","course":"C1","group":"G1"}"#);
        let first = first["token"].as_str().unwrap().to_string();
        kiosk.handle_line(r#"{"op":"issue","course":"C1","group":"G1","validity_minutes":1}"#);

        let revoked = kiosk.handle_line(&json!({ "op": "revoke", "token": first }).to_string());
        assert_eq!(revoked["revoked"], true);
        assert_eq!(error_kind_of(&check_in(&mut kiosk, "P1", &first)), "invalid_token");

        clock.advance(Duration::minutes(2));
        let swept = kiosk.handle_line(r#"{"op":"sweep"}"#);
        assert_eq!(swept["evicted"], 1);
        assert_eq!(swept["outstanding"], 0);
    }

    #[test]
    fn serve_answers_every_line() {
        let mut db = seeded();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut kiosk = open_kiosk(&mut db, presenter(), &clock);
        let input = "{\"op\":\"sweep\"}\n\n{\"op\":\"nope\"}\n";
        let mut output = Vec::new();
        let handled = serve(input.as_bytes(), &mut output, &mut kiosk).unwrap();
        assert_eq!(handled, 2);

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0]["ok"], true);
        assert_eq!(lines[1]["ok"], false);
    }
}
