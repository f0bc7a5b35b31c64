use argh::FromArgs;
use image::{DynamicImage, ImageFormat, RgbaImage};
use qoix::{Colorspace, DecodeOptions, EncodeOptions, PixelFormat};
use std::str::FromStr;

/// QOI encoder, decoder and inspector.
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Encode(Encode),
    Decode(Decode),
    Info(Info),
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Png,
    Jpg,
    Bmp,
}

impl FromStr for Format {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Format::Png),
            "jpg" | "jpeg" => Ok(Format::Jpg),
            "bmp" => Ok(Format::Bmp),
            _ => Err("expected png, jpg, or bmp"),
        }
    }
}

impl From<Format> for ImageFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Png => ImageFormat::Png,
            Format::Jpg => ImageFormat::Jpeg,
            Format::Bmp => ImageFormat::Bmp,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Cli { command } = argh::from_env();

    match command {
        Command::Encode(options) => encode(options),
        Command::Decode(options) => decode(options),
        Command::Info(options) => info(options),
    }
}

/// Encodes an image as QOI.
#[derive(FromArgs)]
#[argh(subcommand, name = "encode")]
struct Encode {
    /// input format, guessed from the content when omitted (png, jpg, bmp)
    #[argh(option)]
    format: Option<Format>,

    /// tag the file as all-linear instead of sRGB
    #[argh(switch)]
    linear: bool,

    /// flip the image vertically while encoding
    #[argh(switch)]
    flip: bool,

    /// the input file (PNG, JPG, or BMP)
    #[argh(positional)]
    input: String,
    /// the output file
    #[argh(positional)]
    output: String,
}

fn encode(options: Encode) -> Result<(), Box<dyn std::error::Error>> {
    let Encode {
        format,
        linear,
        flip,
        input,
        output,
    } = options;

    let reader = match format {
        Some(format) => image::io::Reader::with_format(
            std::io::BufReader::new(std::fs::File::open(&input)?),
            format.into(),
        ),
        None => image::io::Reader::open(&input)?.with_guessed_format()?,
    };
    let image = reader.decode()?;

    let width = image.width();
    let height = image.height();
    println!("Encoding {width}x{height} image");

    let encode_options = EncodeOptions {
        colorspace: if linear {
            Colorspace::Linear
        } else {
            Colorspace::Srgb
        },
        flip_vertical: flip,
        ..Default::default()
    };

    if image.color().has_alpha() {
        let rgba = image.into_rgba8();
        qoix::encode_path(
            rgba.as_raw(),
            width,
            height,
            PixelFormat::Rgba,
            &output,
            &encode_options,
        )?;
    } else {
        let rgb = image.into_rgb8();
        qoix::encode_path(
            rgb.as_raw(),
            width,
            height,
            PixelFormat::Rgb,
            &output,
            &encode_options,
        )?;
    }

    println!("Written `{output}`");
    Ok(())
}

/// Decodes a QOI image into PNG, JPG, or BMP.
#[derive(FromArgs)]
#[argh(subcommand, name = "decode")]
struct Decode {
    /// output format (png, jpg, bmp)
    #[argh(option)]
    format: Format,

    /// the input QOI file
    #[argh(positional)]
    input: String,
    /// the output file
    #[argh(positional)]
    output: String,
}

fn decode(options: Decode) -> Result<(), Box<dyn std::error::Error>> {
    let Decode {
        format,
        input,
        output,
    } = options;

    println!("Decoding `{input}`");

    let decode_options = DecodeOptions {
        desired_channels: Some(PixelFormat::Rgba),
        ..Default::default()
    };
    let image = qoix::decode_path(&input, &decode_options)?;
    let (width, height) = (image.width, image.height);

    let buffer = RgbaImage::from_vec(width, height, image.pixels)
        .ok_or("decoded buffer does not match its dimensions")?;
    let dynamic = match format {
        // JPEG has no alpha channel
        Format::Jpg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(buffer).into_rgb8()),
        _ => DynamicImage::ImageRgba8(buffer),
    };
    dynamic.save_with_format(&output, format.into())?;

    println!("Written {width}x{height} image to `{output}`");
    Ok(())
}

/// Prints the header of a QOI file without decoding it.
#[derive(FromArgs)]
#[argh(subcommand, name = "info")]
struct Info {
    /// the input QOI file
    #[argh(positional)]
    input: String,
}

fn info(options: Info) -> Result<(), Box<dyn std::error::Error>> {
    let header = qoix::info_path(&options.input)?;
    println!("{header}");
    Ok(())
}
