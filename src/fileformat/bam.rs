use anyhow::Result;
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::Record;

///////////////////////////////
/// Get the value of a string (Z) aux tag, if present
pub fn get_string_tag<'a>(record: &'a Record, tag: &str) -> Option<&'a str> {
    match record.aux(tag.as_bytes()) {
        Ok(Aux::String(value)) => Some(value),
        _ => None,
    }
}

///////////////////////////////
/// Set a string (Z) aux tag, replacing any existing value
pub fn set_string_tag(record: &mut Record, tag: &str, value: &str) -> Result<()> {
    if record.aux(tag.as_bytes()).is_ok() {
        record.remove_aux(tag.as_bytes())?;
    }
    record.push_aux(tag.as_bytes(), Aux::String(value))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let mut record = Record::new();
        record.set(b"read1", None, b"ACGT", &[30, 30, 30, 30]);
        record
    }

    #[test]
    fn get_missing_tag() {
        let record = record();
        assert_eq!(get_string_tag(&record, "XD"), None);
    }

    #[test]
    fn set_and_get_tag() {
        let mut record = record();
        set_string_tag(&mut record, "XD", "AACCGGTT").unwrap();
        assert_eq!(get_string_tag(&record, "XD"), Some("AACCGGTT"));
    }

    #[test]
    fn set_replaces_existing_value() {
        let mut record = record();
        set_string_tag(&mut record, "XC", "AAAA").unwrap();
        set_string_tag(&mut record, "XC", "CCCC").unwrap();
        assert_eq!(get_string_tag(&record, "XC"), Some("CCCC"));
    }
}
