use camino::Utf8Path as Path;

pub trait AsUtf8Path {
    fn as_utf8(&self) -> std::io::Result<&Path>;
}

impl AsUtf8Path for std::path::Path {
    fn as_utf8(&self) -> std::io::Result<&Path> {
        Path::from_path(self).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not a valid utf-8 path", self.display()),
            )
        })
    }
}

#[cfg(test)]
pub trait TempDirExt {
    fn utf8_path(&self) -> &Path;
}

#[cfg(test)]
impl TempDirExt for tempfile::TempDir {
    fn utf8_path(&self) -> &Path {
        Path::from_path(self.path()).expect("temporary directory path is not a valid utf8 string")
    }
}
