//! Course and group commands that seed the record store.

use std::io::Write;

use anyhow::Result;

use roll_core::CallerContext;
use roll_db::Database;

use crate::{CourseAction, GroupAction};

pub fn course<W: Write>(
    writer: &mut W,
    db: &mut Database,
    ctx: &CallerContext,
    action: &CourseAction,
) -> Result<()> {
    ctx.authorize_schedule()?;
    match action {
        CourseAction::Add {
            id,
            name,
            presenter,
        } => {
            db.upsert_course(id, name, presenter)?;
            tracing::info!(course = %id, presenter = %presenter, "course saved");
            writeln!(writer, "Course {id} ({name}) presented by {presenter}")?;
        }
    }
    Ok(())
}

pub fn group<W: Write>(
    writer: &mut W,
    db: &mut Database,
    ctx: &CallerContext,
    action: &GroupAction,
) -> Result<()> {
    ctx.authorize_schedule()?;
    match action {
        GroupAction::Add { id, name } => {
            db.add_group(id, name)?;
            writeln!(writer, "Group {id} ({name})")?;
        }
        GroupAction::AddMember { group, participant } => {
            db.add_group_member(group, participant)?;
            tracing::info!(group = %group, participant = %participant, "participant enrolled");
            writeln!(writer, "Enrolled {participant} in {group}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use roll_core::{CourseId, ErrorKind, GroupId, Role, UserId};

    use crate::commands::util::error_kind;

    fn authority() -> CallerContext {
        CallerContext::new(UserId::new("A1").unwrap(), Role::Authority)
    }

    #[test]
    fn seeds_course_group_and_member() {
        let mut db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        course(
            &mut output,
            &mut db,
            &authority(),
            &CourseAction::Add {
                id: CourseId::new("C1").unwrap(),
                name: "Compilers".to_string(),
                presenter: UserId::new("T1").unwrap(),
            },
        )
        .unwrap();
        group(
            &mut output,
            &mut db,
            &authority(),
            &GroupAction::Add {
                id: GroupId::new("G1").unwrap(),
                name: "First years".to_string(),
            },
        )
        .unwrap();
        group(
            &mut output,
            &mut db,
            &authority(),
            &GroupAction::AddMember {
                group: GroupId::new("G1").unwrap(),
                participant: UserId::new("P1").unwrap(),
            },
        )
        .unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Course C1 (Compilers) presented by T1
        Group G1 (First years)
        Enrolled P1 in G1
        ");
    }

    #[test]
    fn presenters_cannot_seed() {
        let mut db = Database::open_in_memory().unwrap();
        let ctx = CallerContext::new(UserId::new("T1").unwrap(), Role::Presenter);
        let err = group(
            &mut Vec::new(),
            &mut db,
            &ctx,
            &GroupAction::Add {
                id: GroupId::new("G1").unwrap(),
                name: "First years".to_string(),
            },
        )
        .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Forbidden));
    }
}
