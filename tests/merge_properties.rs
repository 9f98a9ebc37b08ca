use proptest::prelude::*;
use testgraft::{extract, merge, MergeStatus, TestFileState, TestIdentity};

fn test_fn(name: &str, body: &str) -> String {
    format!("def {name}():\n    {body}\n")
}

/// A test named `name` in one of the shapes generated tests come in.
fn shaped_test(name: &str, body: &str, shape: u8) -> String {
    match shape {
        0 => test_fn(name, body),
        1 => format!("@pytest.mark.slow\ndef {name}():\n    {body}\n"),
        2 => format!(
            "@pytest.mark.parametrize(\"x\", [\n    1,\n    2,\n])\ndef {name}(x):\n    {body}\n"
        ),
        _ => format!("class TestGroup:\n    def {name}(self):\n        {body}\n"),
    }
}

fn body() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "assert True",
        "assert 1 + 1 == 2",
        "assert \"a\" in \"abc\"",
        "pass",
        "assert len([1, 2]) == 2",
    ])
    .prop_map(str::to_string)
}

proptest! {
    #[test]
    fn absent_file_is_always_created(name in "test_[a-z]{1,10}", body in body()) {
        let code = test_fn(&name, &body);
        let out = merge(&TestFileState::missing("t.py"), &code).unwrap();
        prop_assert_eq!(out.status(), MergeStatus::Created);
        prop_assert_eq!(out.content(), code.as_str());
    }

    #[test]
    fn new_test_is_appended_then_replaced(
        existing_names in prop::collection::btree_set("test_[a-m]{1,8}", 0..4),
        name in "test_[n-z]{1,8}",
        body in body(),
        shape in 0u8..4,
        trailing in prop::sample::select(vec!["", "\n", "\n\n", "\n\n\n", "   ", "\n  \n", "\n\t\n\n"]),
    ) {
        let mut existing = existing_names
            .iter()
            .map(|n| test_fn(n, "pass"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim_end()
            .to_string();
        existing.push_str("\nimport os");
        existing.push_str(trailing);

        let code = shaped_test(&name, &body, shape);
        let identity = TestIdentity::find(&code).unwrap();

        let first = merge(&TestFileState::existing("t.py", existing.clone()), &code).unwrap();
        prop_assert_eq!(first.status(), MergeStatus::Appended);
        prop_assert!(first.content().ends_with(&code));
        prop_assert_eq!(identity.count_in(first.content()), 1);
        for n in &existing_names {
            let def_line = format!("def {n}():");
            prop_assert!(first.content().contains(&def_line));
        }

        // Exactly one empty line between the old text and the new block.
        let head = &first.content()[..first.content().len() - code.len()];
        prop_assert_eq!(head.trim_end(), existing.trim_end());
        prop_assert!(head.ends_with("\n\n"));
        prop_assert!(!head[..head.len() - 2].ends_with('\n'));

        let second = merge(&TestFileState::existing("t.py", first.content()), &code).unwrap();
        prop_assert_eq!(second.status(), MergeStatus::Replaced);
        prop_assert_eq!(second.content(), first.content());
    }

    #[test]
    fn replacement_touches_only_the_target(
        before in prop::collection::vec("test_[a-f]{3,6}", 0..3),
        after in prop::collection::vec("test_[p-u]{3,6}", 0..3),
        body in body(),
    ) {
        let target = "test_target";
        let mut parts: Vec<String> = before.iter().map(|n| test_fn(n, "pass")).collect();
        parts.push(test_fn(target, "assert False"));
        parts.extend(after.iter().map(|n| test_fn(n, "pass")));
        let existing = parts.join("\n\n");

        let code = test_fn(target, &body);
        let out = merge(&TestFileState::existing("t.py", existing.clone()), &code).unwrap();

        prop_assert_eq!(out.status(), MergeStatus::Replaced);
        let identity = TestIdentity::find(&code).unwrap();
        prop_assert_eq!(identity.count_in(out.content()), 1);

        let sig = existing.find("def test_target").unwrap();
        prop_assert!(out.content().starts_with(&existing[..sig]));
        let old_end = sig + "def test_target():\n    assert False".len();
        prop_assert!(out.content().ends_with(&existing[old_end..]));
    }

    #[test]
    fn extract_never_panics_and_never_returns_empty_code(raw in "\\PC{0,200}") {
        let wrapped = format!("<output>{raw}</output>");
        if let Some(payload) = extract(&wrapped, "output") {
            prop_assert!(!payload.code.trim().is_empty());
        }
        if !raw.contains("<output>") {
            prop_assert!(extract(&raw, "output").is_none());
        }
    }
}

#[test]
fn tagged_payload_extracts_then_merges() {
    let raw = "<output>{\"name\":\"t\",\"code\":\"def test_a():\\n    assert 1==1\"}</output>";
    let payload = extract(raw, "output").unwrap();
    assert_eq!(payload.code, "def test_a():\n    assert 1==1");

    let out = merge(&TestFileState::existing("t.py", "def test_b():\n    pass\n"), &payload.code).unwrap();
    assert_eq!(
        out.content(),
        "def test_b():\n    pass\n\ndef test_a():\n    assert 1==1"
    );
}
