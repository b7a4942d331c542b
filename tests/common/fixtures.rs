//! Fake fetcher programs and download requests

use chapter_dl::{ChapterRange, ContentType, DownloadRequest, FetchSource};

/// A shell fetcher that behaves like the real one
///
/// Writes one file per chapter into `<output>/<name>/`, prints a progress line after
/// each, checks the pause/cancel/stop markers before every chapter and exits 0 when
/// it finds one. Prints the completion marker after the last chapter.
pub const CHAPTER_FETCHER: &str = r#"
start=1
end=10
while [ $# -gt 0 ]; do
    case "$1" in
        --output) out="$2"; shift 2 ;;
        --start) start="$2"; shift 2 ;;
        --end) end="$2"; shift 2 ;;
        --name|--url) name="$2"; shift 2 ;;
        --download-id) id="$2"; shift 2 ;;
        --signal-dir) sig="$2"; shift 2 ;;
        *) shift ;;
    esac
done
mkdir -p "$out/$name"
i=$start
while [ "$i" -le "$end" ]; do
    for marker in pause cancel stop; do
        if [ -f "$sig/.${marker}_$id" ]; then
            echo "Stopping before chapter $i"
            exit 0
        fi
    done
    echo "chapter $i" > "$out/$name/chapter_$i.txt"
    echo "Progress: $i/$end ($((i * 100 / end))%) - Chapter $i"
    sleep 0.05
    i=$((i + 1))
done
echo "Download complete"
"#;

/// A fetcher that fails after the first chapter
pub const FAILING_FETCHER: &str = r#"
echo "Progress: 1/10 (10%) - Chapter 1"
echo "Error: connection reset by source" 1>&2
exit 2
"#;

/// Request for chapters `1..=end` of a novel looked up by name
pub fn novel_request(name: &str, end: u32) -> DownloadRequest {
    DownloadRequest {
        content_name: name.to_string(),
        content_type: ContentType::Novel,
        source: FetchSource::Name(name.to_string()),
        source_name: "ExampleSite".to_string(),
        range: ChapterRange {
            start: 1,
            end: Some(end),
        },
        total_chapters: end,
    }
}
