//! Markdown rendering of a finished style guide.

use std::fmt::Write;

use styleguide_shared::StyleGuideDocument;

/// Render `document` as Markdown, fields in schema order.
pub fn to_markdown(document: &StyleGuideDocument) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Style guide: {} / {}\n",
        document.category, document.product_type
    );
    let _ = writeln!(out, "_Record {} · {}_\n", document.id, document.created_at.to_rfc3339());

    let unresolved = document.unresolved_fields();
    if !unresolved.is_empty() {
        let _ = writeln!(
            out,
            "> **Unresolved compliance notes:** {}\n",
            unresolved.join(", ")
        );
    }

    for field in document.ordered_fields() {
        let _ = writeln!(out, "## {}\n", field.field);
        if field.unresolved {
            let _ = writeln!(out, "**Status:** unresolved after review\n");
        }
        let _ = writeln!(out, "{}\n", field.text.trim());

        if !field.review_notes.is_empty() {
            let _ = writeln!(out, "<details><summary>Review notes ({})</summary>\n", field.review_notes.len());
            for note in &field.review_notes {
                let _ = writeln!(out, "- {note}");
            }
            let _ = writeln!(out, "\n</details>\n");
        }
    }

    out
}
