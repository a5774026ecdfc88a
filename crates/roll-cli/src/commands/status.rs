//! Status command for showing the database location and record counts.

use std::io::Write;

use anyhow::Result;

use roll_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    let counts = db.counts()?;

    writeln!(writer, "rollcall status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(writer, "Courses: {}", counts.courses)?;
    writeln!(writer, "Groups: {} ({} members)", counts.groups, counts.members)?;
    writeln!(writer, "Slots: {}", counts.slots)?;
    writeln!(writer, "Attendance records: {}", counts.attendance)?;
    writeln!(
        writer,
        "Token validity: {} minutes",
        config.token_validity_minutes
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use roll_core::{GroupId, UserId};

    #[test]
    fn status_command_outputs_counts() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("rollcall.db");
        let mut db = Database::open(&db_path).unwrap();
        let group = GroupId::new("G1").unwrap();
        db.add_group(&group, "First years").unwrap();
        db.add_group_member(&group, &UserId::new("P1").unwrap())
            .unwrap();

        let config = Config {
            database_path: db_path.clone(),
            ..Config::default()
        };
        let mut output = Vec::new();
        run(&mut output, &db, &config).unwrap();

        let output = String::from_utf8(output).unwrap();
        let output = output.replace(&db_path.display().to_string(), "[TEMP]/rollcall.db");
        assert_snapshot!(output, @r"
        rollcall status
        Database: [TEMP]/rollcall.db
        Courses: 0
        Groups: 1 (1 members)
        Slots: 0
        Attendance records: 0
        Token validity: 15 minutes
        ");
    }
}
