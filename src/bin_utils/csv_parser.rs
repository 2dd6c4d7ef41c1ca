use std::io::Read;

use crate::command::OperationKind;
use csv::{DeserializeRecordsIntoIter, Trim};
use serde::{Deserialize, de::DeserializeOwned};

/// Seed row: `client,balance,currency`.
#[derive(Debug, Deserialize)]
pub struct AccountRecord {
    pub client: String,
    pub balance: i64,
    pub currency: String,
}

/// Operation row: `type,client,to,amount,key`. `to` is only read for transfers.
#[derive(Debug, Deserialize)]
pub struct OperationRecord {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub client: String,
    pub to: Option<String>,
    pub amount: i64,
    pub key: Option<String>,
}

/// Parses CSV rows into `T`, yielding the line each row started on.
pub struct CsvRecordParser<R, T> {
    iter: DeserializeRecordsIntoIter<R, T>,
}

impl<R, T> CsvRecordParser<R, T>
where
    R: Read,
    T: DeserializeOwned,
{
    /// Reads the header row up front so reported lines start at the first record.
    pub fn new(source: R) -> csv::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);
        reader.headers()?;

        Ok(Self {
            iter: reader.into_deserialize(),
        })
    }
}

impl<R, T> Iterator for CsvRecordParser<R, T>
where
    R: Read,
    T: DeserializeOwned,
{
    type Item = (u64, csv::Result<T>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}
