//! Streaming Multi-Status (207) writer.
//!
//! PROPFIND responses can be arbitrarily large, so the body is produced
//! one `<D:response>` at a time: the caller serializes a response, takes
//! the buffered bytes, and ships them while the filesystem walk continues.
//! The `<D:multistatus>` opener goes out with the first response, the
//! closer on [`MultiStatusWriter::close`].

use std::io;

use bytes::Bytes;
use http::StatusCode;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};
use xmltree::Element;

use crate::errors::status_text;
use crate::util::MemBuffer;
use crate::xmlutil::write_element;
use crate::{DavError, DavResult};

/// One `<D:propstat>` group: properties that share a status.
#[derive(Debug, Default)]
pub(crate) struct Propstat {
    pub status: StatusCode,
    pub props: Vec<Element>,
    /// Precondition/postcondition element for `<D:error>`.
    pub error: Option<Element>,
    pub response_description: Option<String>,
}

impl Propstat {
    pub fn new(status: StatusCode) -> Propstat {
        Propstat {
            status,
            props: Vec::new(),
            error: None,
            response_description: None,
        }
    }
}

pub(crate) struct MultiStatusWriter {
    writer: EventWriter<MemBuffer>,
    opened: bool,
}

fn werr(err: xml::writer::Error) -> DavError {
    DavError::IoError(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

impl MultiStatusWriter {
    pub fn new() -> MultiStatusWriter {
        let writer = EmitterConfig::new()
            .write_document_declaration(true)
            .perform_indent(false)
            .create_writer(MemBuffer::new());
        MultiStatusWriter {
            writer,
            opened: false,
        }
    }

    fn open(&mut self) -> DavResult<()> {
        if !self.opened {
            self.writer
                .write(XmlEvent::start_element("D:multistatus").ns("D", "DAV:"))
                .map_err(werr)?;
            self.opened = true;
        }
        Ok(())
    }

    /// Serialize one `<D:response>`. The bytes are buffered; drain them
    /// with [`take`](Self::take).
    pub fn write_response(&mut self, href: &str, propstats: Vec<Propstat>) -> DavResult<()> {
        self.open()?;
        let w = &mut self.writer;
        w.write(XmlEvent::start_element("D:response")).map_err(werr)?;
        w.write(XmlEvent::start_element("D:href")).map_err(werr)?;
        w.write(XmlEvent::characters(href)).map_err(werr)?;
        w.write(XmlEvent::end_element()).map_err(werr)?;

        for propstat in propstats {
            w.write(XmlEvent::start_element("D:propstat")).map_err(werr)?;
            w.write(XmlEvent::start_element("D:prop")).map_err(werr)?;
            for prop in &propstat.props {
                write_element(w, prop).map_err(werr)?;
            }
            w.write(XmlEvent::end_element()).map_err(werr)?;

            let status_line = format!(
                "HTTP/1.1 {} {}",
                propstat.status.as_u16(),
                status_text(propstat.status)
            );
            w.write(XmlEvent::start_element("D:status")).map_err(werr)?;
            w.write(XmlEvent::characters(&status_line)).map_err(werr)?;
            w.write(XmlEvent::end_element()).map_err(werr)?;

            if let Some(error) = &propstat.error {
                w.write(XmlEvent::start_element("D:error")).map_err(werr)?;
                write_element(w, error).map_err(werr)?;
                w.write(XmlEvent::end_element()).map_err(werr)?;
            }
            if let Some(desc) = &propstat.response_description {
                w.write(XmlEvent::start_element("D:responsedescription"))
                    .map_err(werr)?;
                w.write(XmlEvent::characters(desc)).map_err(werr)?;
                w.write(XmlEvent::end_element()).map_err(werr)?;
            }
            w.write(XmlEvent::end_element()).map_err(werr)?;
        }
        w.write(XmlEvent::end_element()).map_err(werr)?;
        Ok(())
    }

    /// Drain the bytes produced so far.
    pub fn take(&mut self) -> Bytes {
        self.writer.inner_mut().take()
    }

    /// Write the `</D:multistatus>` closer and return the remaining bytes.
    pub fn close(mut self) -> DavResult<Bytes> {
        self.open()?;
        self.writer
            .write(XmlEvent::end_element())
            .map_err(werr)?;
        Ok(self.writer.inner_mut().take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmlutil::dav_text_element;

    #[test]
    fn single_response_document() {
        let mut ms = MultiStatusWriter::new();
        let mut ps = Propstat::new(StatusCode::OK);
        ps.props.push(dav_text_element("displayname", "file.txt"));
        ms.write_response("/dav/file.txt", vec![ps]).unwrap();
        let mut out = ms.take().to_vec();
        out.extend_from_slice(&ms.close().unwrap());
        let s = String::from_utf8(out).unwrap();

        assert!(s.contains("<D:multistatus xmlns:D=\"DAV:\">"), "{}", s);
        assert!(s.contains("<D:href>/dav/file.txt</D:href>"), "{}", s);
        assert!(s.contains("<D:status>HTTP/1.1 200 OK</D:status>"), "{}", s);
        assert!(s.contains("<D:displayname>file.txt</D:displayname>"), "{}", s);
        assert!(s.ends_with("</D:multistatus>"), "{}", s);
    }

    #[test]
    fn empty_walk_still_produces_document() {
        let ms = MultiStatusWriter::new();
        let out = ms.close().unwrap();
        let s = String::from_utf8(out.to_vec()).unwrap();
        assert!(s.contains("<D:multistatus"), "{}", s);
    }
}
