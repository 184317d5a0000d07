use crate::app::model::{Book, BookStatus};

const PRINT_CSS: &str = "\
body { font-family: Georgia, serif; margin: 0; color: #222; }
section { page-break-after: always; padding: 2rem; text-align: center; }
section img { max-width: 100%; height: auto; border-radius: 12px; }
.title-page h1 { font-size: 2.6rem; margin-top: 1.5rem; }
.page p { font-size: 1.5rem; line-height: 1.6; margin: 1.5rem auto; max-width: 40rem; }
.page-number { color: #888; font-size: 0.9rem; }
@media print { section { padding: 1cm; } }
";

/// Standalone printable HTML for a finished book. Browsers print it to PDF.
pub fn render_book_html(book: &Book) -> anyhow::Result<String> {
    if book.status != BookStatus::Completed {
        anyhow::bail!("book {} is not completed (status: {:?})", book.id, book.status);
    }

    let title = html_escape(&book.title);
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n");
    out.push_str("<html lang=\"en\">\n");
    out.push_str("<head>\n");
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str(&format!("  <title>{title}</title>\n"));
    out.push_str(&format!("  <style>\n{PRINT_CSS}  </style>\n"));
    out.push_str("</head>\n");
    out.push_str("<body>\n");

    out.push_str("  <section class=\"title-page\">\n");
    if let Some(title_page) = &book.title_page {
        out.push_str(&format!(
            "    <img src=\"{}\" alt=\"{}\" />\n",
            html_escape(&title_page.image),
            title
        ));
    }
    out.push_str(&format!("    <h1>{title}</h1>\n"));
    out.push_str("  </section>\n");

    for page in &book.pages {
        out.push_str(&format!(
            "  <section class=\"page\" id=\"page-{}\">\n",
            page.page_number
        ));
        if !page.image.is_empty() {
            out.push_str(&format!(
                "    <img src=\"{}\" alt=\"Illustration for page {}\" />\n",
                html_escape(&page.image),
                page.page_number
            ));
        }
        out.push_str(&format!("    <p>{}</p>\n", html_escape(&page.text)));
        out.push_str(&format!(
            "    <div class=\"page-number\">{}</div>\n",
            page.page_number
        ));
        out.push_str("  </section>\n");
    }

    out.push_str("</body>\n");
    out.push_str("</html>\n");
    Ok(out)
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
